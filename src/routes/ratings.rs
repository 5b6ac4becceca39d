use actix_web::{delete, get, put, web, HttpResponse};
use chrono::Utc;
use diesel::dsl::{count_star, sql};
use diesel::prelude::*;
use diesel::sql_types::{Double, Nullable};
use diesel::PgConnection;
use serde::Deserialize;
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::models::{NewRating, Rating, RatingSummary};
use crate::routes::videos::ensure_published;
use crate::schema::ratings;

pub fn rating_summary(conn: &mut PgConnection, video_id: i32) -> Result<RatingSummary, ApiError> {
    let (average, count): (Option<f64>, i64) = ratings::table
        .filter(ratings::video_id.eq(video_id))
        .select((sql::<Nullable<Double>>("AVG(score)::float8"), count_star()))
        .first(conn)?;

    Ok(RatingSummary {
        video_id,
        average: average.map(|a| (a * 100.0).round() / 100.0),
        count,
    })
}

#[derive(Deserialize, Validate)]
pub struct RateInfo {
    #[validate(range(min = 1, max = 10))]
    score: i16,
}

/// One rating per user per video; rating again replaces the score.
#[put("/{video_id}")]
pub async fn rate_video(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    path: web::Path<i32>,
    data: web::Json<RateInfo>,
) -> Result<HttpResponse, ApiError> {
    data.validate()?;
    let video_id = path.into_inner();
    let user_id = user.id();
    let score = data.score;

    let rating = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;
        Ok(diesel::insert_into(ratings::table)
            .values(NewRating {
                user_id,
                video_id,
                score,
            })
            .on_conflict((ratings::user_id, ratings::video_id))
            .do_update()
            .set((ratings::score.eq(score), ratings::updated_at.eq(Utc::now())))
            .returning(Rating::as_returning())
            .get_result(conn)?)
    })
    .await?;

    Ok(HttpResponse::Ok().json(rating))
}

#[delete("/{video_id}")]
pub async fn delete_rating(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let user_id = user.id();

    let deleted = db::run(&pool, move |conn| {
        Ok(diesel::delete(
            ratings::table
                .filter(ratings::user_id.eq(user_id))
                .filter(ratings::video_id.eq(video_id)),
        )
        .execute(conn)?)
    })
    .await?;

    if deleted == 0 {
        return Err(ApiError::NotFound("rating"));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[get("/{video_id}/summary")]
pub async fn get_rating_summary(pool: web::Data<DbPool>, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let summary = db::run(&pool, move |conn| {
        ensure_published(conn, video_id)?;
        rating_summary(conn, video_id)
    })
    .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_must_be_between_one_and_ten() {
        assert!(RateInfo { score: 1 }.validate().is_ok());
        assert!(RateInfo { score: 10 }.validate().is_ok());
        assert!(RateInfo { score: 0 }.validate().is_err());
        assert!(RateInfo { score: 11 }.validate().is_err());
    }
}
