use actix_web::{delete, get, patch, post, web, HttpResponse};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Deserialize;
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::pagination::{Page, PageParams};
use crate::helpers::storage::Storage;
use crate::helpers::users::create_default_folder;
use crate::middleware::auth::CurrentUser;
use crate::models::{FavoriteFolder, NewFavorite, NewFavoriteFolder, Video};
use crate::routes::videos::{ensure_published, summarize};
use crate::schema::{favorite_folders, favorites, videos};

fn owned_folder(conn: &mut PgConnection, folder_id: i32, user_id: i32) -> Result<FavoriteFolder, ApiError> {
    favorite_folders::table
        .find(folder_id)
        .filter(favorite_folders::user_id.eq(user_id))
        .select(FavoriteFolder::as_select())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("folder"))
}

/// Every user has a default folder; accounts that somehow lost it get a fresh one.
fn default_folder(conn: &mut PgConnection, user_id: i32) -> Result<FavoriteFolder, ApiError> {
    let existing = favorite_folders::table
        .filter(favorite_folders::user_id.eq(user_id))
        .filter(favorite_folders::is_default.eq(true))
        .select(FavoriteFolder::as_select())
        .first(conn)
        .optional()?;

    match existing {
        Some(folder) => Ok(folder),
        None => create_default_folder(conn, user_id),
    }
}

fn add_to_folder(conn: &mut PgConnection, folder_id: i32, user_id: i32, video_id: i32) -> Result<(), ApiError> {
    ensure_published(conn, video_id)?;
    let inserted = diesel::insert_into(favorites::table)
        .values(NewFavorite {
            folder_id,
            user_id,
            video_id,
        })
        .on_conflict_do_nothing()
        .execute(conn)?;

    if inserted == 0 {
        return Err(ApiError::Conflict("video is already in this folder".into()));
    }
    Ok(())
}

#[get("/folders")]
pub async fn get_folders(pool: web::Data<DbPool>, user: CurrentUser) -> Result<HttpResponse, ApiError> {
    let user_id = user.id();
    let folders: Vec<FavoriteFolder> = db::run(&pool, move |conn| {
        Ok(favorite_folders::table
            .filter(favorite_folders::user_id.eq(user_id))
            .order((favorite_folders::is_default.desc(), favorite_folders::name.asc()))
            .select(FavoriteFolder::as_select())
            .load(conn)?)
    })
    .await?;
    Ok(HttpResponse::Ok().json(folders))
}

#[derive(Deserialize, Validate)]
pub struct CreateFolderInfo {
    #[validate(length(min = 1, max = 64))]
    name: String,
}

impl CreateFolderInfo {
    fn trimmed(self) -> Self {
        CreateFolderInfo {
            name: self.name.trim().to_string(),
        }
    }
}

#[post("/folders")]
pub async fn create_folder(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    data: web::Json<CreateFolderInfo>,
) -> Result<HttpResponse, ApiError> {
    let data = data.into_inner().trimmed();
    data.validate()?;
    let user_id = user.id();

    let folder = db::run(&pool, move |conn| {
        Ok(diesel::insert_into(favorite_folders::table)
            .values(NewFavoriteFolder {
                user_id,
                name: &data.name,
                is_default: false,
            })
            .returning(FavoriteFolder::as_returning())
            .get_result(conn)?)
    })
    .await?;
    Ok(HttpResponse::Created().json(folder))
}

#[derive(Deserialize, Validate)]
pub struct UpdateFolderInfo {
    #[validate(length(min = 1, max = 64))]
    name: Option<String>,
    is_default: Option<bool>,
}

impl UpdateFolderInfo {
    fn trimmed(self) -> Self {
        UpdateFolderInfo {
            name: self.name.map(|name| name.trim().to_string()),
            is_default: self.is_default,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DefaultChange {
    Keep,
    Promote,
}

/// The default flag can only move to another folder, never be switched off in place.
fn default_change(folder: &FavoriteFolder, requested: Option<bool>) -> Result<DefaultChange, ApiError> {
    match requested {
        Some(true) if !folder.is_default => Ok(DefaultChange::Promote),
        Some(false) if folder.is_default => Err(ApiError::Conflict("choose another default folder instead".into())),
        _ => Ok(DefaultChange::Keep),
    }
}

fn ensure_deletable(folder: &FavoriteFolder) -> Result<(), ApiError> {
    if folder.is_default {
        return Err(ApiError::Conflict("the default folder cannot be deleted".into()));
    }
    Ok(())
}

/// Making a folder the default clears the flag on the previous one first.
fn update_owned_folder(
    conn: &mut PgConnection,
    folder_id: i32,
    user_id: i32,
    data: UpdateFolderInfo,
) -> Result<FavoriteFolder, ApiError> {
    let folder = owned_folder(conn, folder_id, user_id)?;

    if default_change(&folder, data.is_default)? == DefaultChange::Promote {
        diesel::update(
            favorite_folders::table
                .filter(favorite_folders::user_id.eq(user_id))
                .filter(favorite_folders::is_default.eq(true)),
        )
        .set(favorite_folders::is_default.eq(false))
        .execute(conn)?;
        diesel::update(favorite_folders::table.find(folder_id))
            .set(favorite_folders::is_default.eq(true))
            .execute(conn)?;
    }

    if let Some(name) = data.name {
        diesel::update(favorite_folders::table.find(folder_id))
            .set(favorite_folders::name.eq(name))
            .execute(conn)?;
    }

    owned_folder(conn, folder_id, user_id)
}

fn delete_owned_folder(conn: &mut PgConnection, folder_id: i32, user_id: i32) -> Result<(), ApiError> {
    let folder = owned_folder(conn, folder_id, user_id)?;
    ensure_deletable(&folder)?;
    diesel::delete(favorite_folders::table.find(folder_id)).execute(conn)?;
    Ok(())
}

#[patch("/folders/{folder_id}")]
pub async fn update_folder(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    path: web::Path<i32>,
    data: web::Json<UpdateFolderInfo>,
) -> Result<HttpResponse, ApiError> {
    let data = data.into_inner().trimmed();
    data.validate()?;
    let folder_id = path.into_inner();
    let user_id = user.id();

    let folder = db::run(&pool, move |conn| update_owned_folder(conn, folder_id, user_id, data)).await?;
    Ok(HttpResponse::Ok().json(folder))
}

#[delete("/folders/{folder_id}")]
pub async fn delete_folder(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let folder_id = path.into_inner();
    let user_id = user.id();

    db::run(&pool, move |conn| delete_owned_folder(conn, folder_id, user_id)).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/folders/{folder_id}/videos")]
pub async fn get_folder_videos(
    pool: web::Data<DbPool>,
    storage: web::Data<Storage>,
    user: CurrentUser,
    path: web::Path<i32>,
    page: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let folder_id = path.into_inner();
    let user_id = user.id();
    let (page, per_page, offset) = page.resolve();

    let (items, total) = db::run(&pool, move |conn| {
        owned_folder(conn, folder_id, user_id)?;

        let total: i64 = favorites::table
            .filter(favorites::folder_id.eq(folder_id))
            .count()
            .get_result(conn)?;
        let items: Vec<Video> = favorites::table
            .inner_join(videos::table)
            .filter(favorites::folder_id.eq(folder_id))
            .order((favorites::created_at.desc(), favorites::id.desc()))
            .limit(per_page)
            .offset(offset)
            .select(Video::as_select())
            .load(conn)?;
        Ok((items, total))
    })
    .await?;

    let items = summarize(items, &storage).await;
    Ok(HttpResponse::Ok().json(Page::new(items, total, page, per_page)))
}

#[derive(Deserialize)]
pub struct AddFavoriteInfo {
    video_id: i32,
}

#[post("/folders/{folder_id}/videos")]
pub async fn add_favorite(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    path: web::Path<i32>,
    data: web::Json<AddFavoriteInfo>,
) -> Result<HttpResponse, ApiError> {
    let folder_id = path.into_inner();
    let video_id = data.video_id;
    let user_id = user.id();

    db::run(&pool, move |conn| {
        owned_folder(conn, folder_id, user_id)?;
        add_to_folder(conn, folder_id, user_id, video_id)
    })
    .await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "folder_id": folder_id, "video_id": video_id })))
}

#[delete("/folders/{folder_id}/videos/{video_id}")]
pub async fn remove_favorite(
    pool: web::Data<DbPool>,
    user: CurrentUser,
    path: web::Path<(i32, i32)>,
) -> Result<HttpResponse, ApiError> {
    let (folder_id, video_id) = path.into_inner();
    let user_id = user.id();

    let removed = db::run(&pool, move |conn| {
        owned_folder(conn, folder_id, user_id)?;
        Ok(diesel::delete(
            favorites::table
                .filter(favorites::folder_id.eq(folder_id))
                .filter(favorites::video_id.eq(video_id)),
        )
        .execute(conn)?)
    })
    .await?;

    if removed == 0 {
        return Err(ApiError::NotFound("favorite"));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// Quick-add into the default folder.
#[post("/videos/{video_id}")]
pub async fn add_to_default_folder(pool: web::Data<DbPool>, user: CurrentUser, path: web::Path<i32>) -> Result<HttpResponse, ApiError> {
    let video_id = path.into_inner();
    let user_id = user.id();

    let folder_id = db::run(&pool, move |conn| {
        let folder = default_folder(conn, user_id)?;
        add_to_folder(conn, folder.id, user_id, video_id)?;
        Ok(folder.id)
    })
    .await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "folder_id": folder_id, "video_id": video_id })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::header::AUTHORIZATION;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use chrono::Utc;

    use super::*;
    use crate::config::test_config;
    use crate::fixtures;
    use crate::middleware::auth::bearer_for;
    use crate::models::VideoStatus;

    fn folder(is_default: bool) -> FavoriteFolder {
        FavoriteFolder {
            id: 3,
            user_id: 1,
            name: "Later".into(),
            is_default,
            created_at: Utc::now(),
        }
    }

    fn folders_of(conn: &mut PgConnection, user_id: i32) -> Vec<FavoriteFolder> {
        favorite_folders::table
            .filter(favorite_folders::user_id.eq(user_id))
            .order(favorite_folders::id.asc())
            .select(FavoriteFolder::as_select())
            .load(conn)
            .unwrap()
    }

    #[actix_web::test]
    async fn blank_folder_names_fail_validation_after_trimming() {
        let blank = CreateFolderInfo { name: "   ".into() }.trimmed();
        assert!(blank.validate().is_err());

        let padded = CreateFolderInfo { name: "  Noir  ".into() }.trimmed();
        assert!(padded.validate().is_ok());
        assert_eq!(padded.name, "Noir");

        let rename = UpdateFolderInfo {
            name: Some("\t".into()),
            is_default: None,
        }
        .trimmed();
        assert!(rename.validate().is_err());
    }

    #[actix_web::test]
    async fn blank_folder_name_is_rejected_before_the_database() {
        let config = test_config();
        let token = bearer_for(&config, 7);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(db::lazy_pool("postgres://localhost/unused")))
                .app_data(web::Data::new(config))
                .service(create_folder),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/folders")
            .insert_header((AUTHORIZATION, token))
            .set_json(serde_json::json!({ "name": "    " }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn default_flag_moves_but_is_never_cleared_in_place() {
        assert_eq!(default_change(&folder(false), Some(true)).unwrap(), DefaultChange::Promote);
        assert_eq!(default_change(&folder(true), Some(true)).unwrap(), DefaultChange::Keep);
        assert_eq!(default_change(&folder(false), None).unwrap(), DefaultChange::Keep);
        assert!(matches!(default_change(&folder(true), Some(false)), Err(ApiError::Conflict(_))));

        assert!(matches!(ensure_deletable(&folder(true)), Err(ApiError::Conflict(_))));
        assert!(ensure_deletable(&folder(false)).is_ok());
    }

    #[actix_web::test]
    async fn promoting_a_folder_demotes_the_previous_default() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "fav_promote");
        let other: FavoriteFolder = diesel::insert_into(favorite_folders::table)
            .values(NewFavoriteFolder {
                user_id: user.id,
                name: "Noir",
                is_default: false,
            })
            .returning(FavoriteFolder::as_returning())
            .get_result(&mut conn)
            .unwrap();

        let change = UpdateFolderInfo {
            name: None,
            is_default: Some(true),
        };
        let promoted = update_owned_folder(&mut conn, other.id, user.id, change).unwrap();
        assert!(promoted.is_default);

        let defaults: Vec<i32> = folders_of(&mut conn, user.id)
            .into_iter()
            .filter(|f| f.is_default)
            .map(|f| f.id)
            .collect();
        assert_eq!(defaults, vec![other.id]);
    }

    #[actix_web::test]
    async fn default_folder_cannot_be_deleted() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "fav_delete");
        let default = folders_of(&mut conn, user.id).remove(0);

        let err = delete_owned_folder(&mut conn, default.id, user.id).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(folders_of(&mut conn, user.id).len(), 1);
    }

    #[actix_web::test]
    async fn adding_the_same_video_twice_conflicts() {
        let Some(mut conn) = db::test_connection() else { return };
        let user = fixtures::user(&mut conn, "fav_twice");
        let video = fixtures::video(&mut conn, "fav-twice", VideoStatus::Published);
        let folder = default_folder(&mut conn, user.id).unwrap();

        add_to_folder(&mut conn, folder.id, user.id, video.id).unwrap();
        let err = add_to_folder(&mut conn, folder.id, user.id, video.id).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
