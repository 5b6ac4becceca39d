use actix_web::{delete, post, web, HttpResponse};
use diesel::prelude::*;
use serde::Deserialize;
use validator::Validate;

use crate::db::{self, DbPool};
use crate::errors::ApiError;
use crate::helpers::audit::{self, AuditEntry};
use crate::helpers::permissions::{self, PermissionCache};
use crate::middleware::auth::CurrentAdmin;
use crate::models::{Category, Country, NewCategory, NewCountry, NewPerson, NewTag, Person, Tag};
use crate::routes::admin::videos::slugify;
use crate::schema::{categories, countries, people, tags};

#[derive(Deserialize, Validate)]
pub struct CategoryInfo {
    #[validate(length(min = 1, max = 64))]
    name: String,
    #[validate(length(max = 1000))]
    description: Option<String>,
}

#[post("/categories")]
pub async fn create_category(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<CategoryInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    data.validate()?;
    let info = data.into_inner();
    let slug = slugify(&info.name);
    if slug.is_empty() {
        return Err(ApiError::BadRequest("name must contain letters or digits".into()));
    }

    let category = db::run(&pool, move |conn| {
        let category: Category = diesel::insert_into(categories::table)
            .values(NewCategory {
                name: info.name.trim().to_string(),
                slug,
                description: info.description,
            })
            .returning(Category::as_returning())
            .get_result(conn)?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "category", Some(category.id)).with_details(serde_json::json!({ "name": category.name })),
        )?;
        Ok(category)
    })
    .await?;

    Ok(HttpResponse::Created().json(category))
}

#[delete("/categories/{category_id}")]
pub async fn delete_category(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    let category_id = path.into_inner();

    db::run(&pool, move |conn| {
        if diesel::delete(categories::table.find(category_id)).execute(conn)? == 0 {
            return Err(ApiError::NotFound("category"));
        }
        audit::record(conn, &admin, AuditEntry::new("delete", "category", Some(category_id)))
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize, Validate)]
pub struct TagInfo {
    #[validate(length(min = 1, max = 64))]
    name: String,
}

#[post("/tags")]
pub async fn create_tag(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<TagInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    data.validate()?;
    let name = data.into_inner().name.trim().to_lowercase();

    let tag = db::run(&pool, move |conn| {
        let tag: Tag = diesel::insert_into(tags::table)
            .values(NewTag { name: &name })
            .returning(Tag::as_returning())
            .get_result(conn)?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "tag", Some(tag.id)).with_details(serde_json::json!({ "name": tag.name })),
        )?;
        Ok(tag)
    })
    .await?;

    Ok(HttpResponse::Created().json(tag))
}

#[delete("/tags/{tag_id}")]
pub async fn delete_tag(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    let tag_id = path.into_inner();

    db::run(&pool, move |conn| {
        if diesel::delete(tags::table.find(tag_id)).execute(conn)? == 0 {
            return Err(ApiError::NotFound("tag"));
        }
        audit::record(conn, &admin, AuditEntry::new("delete", "tag", Some(tag_id)))
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize, Validate)]
pub struct CountryInfo {
    #[validate(length(equal = 2))]
    code: String,
    #[validate(length(min = 1, max = 64))]
    name: String,
}

/// Country codes are stored as upper-case ISO 3166-1 alpha-2.
#[post("/countries")]
pub async fn create_country(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<CountryInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    data.validate()?;
    let info = data.into_inner();
    if !info.code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::BadRequest("country code must be two letters".into()));
    }
    let code = info.code.to_ascii_uppercase();

    let country = db::run(&pool, move |conn| {
        let country: Country = diesel::insert_into(countries::table)
            .values(NewCountry {
                code: &code,
                name: info.name.trim(),
            })
            .returning(Country::as_returning())
            .get_result(conn)?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "country", Some(country.id)).with_details(serde_json::json!({ "code": country.code })),
        )?;
        Ok(country)
    })
    .await?;

    Ok(HttpResponse::Created().json(country))
}

#[delete("/countries/{country_id}")]
pub async fn delete_country(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    let country_id = path.into_inner();

    db::run(&pool, move |conn| {
        if diesel::delete(countries::table.find(country_id)).execute(conn)? == 0 {
            return Err(ApiError::NotFound("country"));
        }
        audit::record(conn, &admin, AuditEntry::new("delete", "country", Some(country_id)))
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize, Validate)]
pub struct PersonInfo {
    #[validate(length(min = 1, max = 128))]
    name: String,
    #[validate(length(max = 5000))]
    bio: Option<String>,
}

#[post("/people")]
pub async fn create_person(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    data: web::Json<PersonInfo>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    data.validate()?;
    let info = data.into_inner();

    let person = db::run(&pool, move |conn| {
        let person: Person = diesel::insert_into(people::table)
            .values(NewPerson {
                name: info.name.trim().to_string(),
                bio: info.bio,
                photo_key: None,
            })
            .returning(Person::as_returning())
            .get_result(conn)?;
        audit::record(
            conn,
            &admin,
            AuditEntry::new("create", "person", Some(person.id)).with_details(serde_json::json!({ "name": person.name })),
        )?;
        Ok(person)
    })
    .await?;

    Ok(HttpResponse::Created().json(person))
}

#[delete("/people/{person_id}")]
pub async fn delete_person(
    pool: web::Data<DbPool>,
    cache: web::Data<PermissionCache>,
    admin: CurrentAdmin,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    permissions::require(&pool, &cache, admin.id, permissions::CATALOG_WRITE).await?;
    let person_id = path.into_inner();

    db::run(&pool, move |conn| {
        if diesel::delete(people::table.find(person_id)).execute(conn)? == 0 {
            return Err(ApiError::NotFound("person"));
        }
        audit::record(conn, &admin, AuditEntry::new("delete", "person", Some(person_id)))
    })
    .await?;

    Ok(HttpResponse::NoContent().finish())
}
