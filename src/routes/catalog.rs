use actix_web::{get, web, HttpResponse};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::Deserialize;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::models::{Category, Country, CreditRole, Person, PopularTag, Tag, VideoStatus};
use crate::schema::{categories, countries, people, tags, video_credits, video_tags, videos};

const POPULAR_TAG_COUNT: i64 = 10;

#[get("/categories")]
pub async fn get_categories(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let result: Vec<Category> = db::run(&pool, |conn| {
        Ok(categories::table
            .order(categories::name.asc())
            .select(Category::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/tags")]
pub async fn get_available_tags(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let result: Vec<Tag> = db::run(&pool, |conn| {
        Ok(tags::table.order(tags::name.asc()).select(Tag::as_select()).load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

/// The tags attached to the most published videos.
#[get("/tags/popular")]
pub async fn get_popular_tags(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let result: Vec<PopularTag> = db::run(&pool, |conn| {
        Ok(tags::table
            .inner_join(video_tags::table.inner_join(videos::table))
            .filter(videos::status.eq(VideoStatus::Published.as_str()))
            .group_by((tags::id, tags::name))
            .select((tags::id, tags::name, count_star()))
            .order((count_star().desc(), tags::name.asc()))
            .limit(POPULAR_TAG_COUNT)
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[get("/countries")]
pub async fn get_countries(pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let result: Vec<Country> = db::run(&pool, |conn| {
        Ok(countries::table
            .order(countries::name.asc())
            .select(Country::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}

#[derive(Deserialize)]
pub struct PeopleQuery {
    role: Option<String>,
}

/// `?role=actor|director` narrows to people credited in that role at least once.
#[get("/people")]
pub async fn get_people(pool: web::Data<DbPool>, query: web::Query<PeopleQuery>) -> Result<HttpResponse, ApiError> {
    let role = match query.role.as_deref() {
        Some(raw) => Some(
            CreditRole::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown role {}", raw)))?,
        ),
        None => None,
    };

    let result: Vec<Person> = db::run(&pool, move |conn| {
        let mut query = people::table
            .order(people::name.asc())
            .select(Person::as_select())
            .into_boxed::<diesel::pg::Pg>();
        if let Some(role) = role {
            let credited = video_credits::table
                .filter(video_credits::role.eq(role.as_str()))
                .select(video_credits::person_id);
            query = query.filter(people::id.eq_any(credited));
        }
        Ok(query.load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(result))
}
