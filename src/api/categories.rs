use std::sync::Arc;

use serde::Serialize;
use vitrine_api_types::{
    CategoryDto, CategoryFilter, CategoryInAdminDto, PaginationResponse, UpdateCategoryDto,
};

use super::forms::{self, NewCategory};
use super::{ApiError, DEFAULT_PAGE_SIZE, Storefront};
use crate::cache::{MutationDescriptor, QueryError, QueryHandle, QueryKey, QueryOptions};
use crate::transport::{ApiRequest, FilePart, MultipartBody};

pub const CATEGORIES: &str = "categories";
pub const ADMIN_CATEGORIES: &str = "admin-categories";

pub type AdminCategoryPage = PaginationResponse<CategoryInAdminDto>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub page: u32,
    pub size: u32,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub fn category_key(id: i64) -> QueryKey {
    QueryKey::resource(CATEGORIES).with(id)
}

pub fn categories_key(window: PageWindow) -> QueryKey {
    QueryKey::resource(CATEGORIES).with(serde_json::json!({
        "page": window.page,
        "size": window.size,
    }))
}

pub fn admin_categories_key(filter: &CategoryFilter) -> Result<QueryKey, QueryError> {
    QueryKey::resource(ADMIN_CATEGORIES).try_with(filter)
}

/// Replacement thumbnail for a category.
#[derive(Debug, Clone)]
pub struct CategoryThumbnail {
    pub category_id: i64,
    pub image: FilePart,
}

impl Storefront {
    pub async fn categories(&self, window: PageWindow) -> Result<Arc<Vec<CategoryDto>>, QueryError> {
        self.queries
            .fetch_query(
                categories_key(window),
                self.get_fetcher(CATEGORIES.to_string(), window),
                QueryOptions::new(),
            )
            .await
    }

    pub fn use_categories(
        &self,
        window: PageWindow,
    ) -> Result<QueryHandle<Vec<CategoryDto>>, QueryError> {
        self.queries.use_query(
            categories_key(window),
            self.get_fetcher(CATEGORIES.to_string(), window),
            QueryOptions::new(),
        )
    }

    pub async fn category(&self, id: i64) -> Result<Arc<CategoryDto>, QueryError> {
        self.queries
            .fetch_query(
                category_key(id),
                self.get_fetcher(format!("{CATEGORIES}/{id}"), ()),
                QueryOptions::new(),
            )
            .await
    }

    pub async fn admin_categories(
        &self,
        filter: &CategoryFilter,
    ) -> Result<Arc<AdminCategoryPage>, QueryError> {
        self.queries
            .fetch_query(
                admin_categories_key(filter)?,
                self.get_fetcher(format!("{CATEGORIES}/admin"), filter.clone()),
                QueryOptions::new(),
            )
            .await
    }

    pub fn use_admin_categories(
        &self,
        filter: &CategoryFilter,
    ) -> Result<QueryHandle<AdminCategoryPage>, QueryError> {
        self.queries.use_query(
            admin_categories_key(filter)?,
            self.get_fetcher(format!("{CATEGORIES}/admin"), filter.clone()),
            QueryOptions::new(),
        )
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn create_category_mutation(&self) -> MutationDescriptor<NewCategory, ()> {
        self.unit_mutation("create_category", |input: &NewCategory| {
            Ok(ApiRequest::post(CATEGORIES).multipart(input.to_multipart()))
        })
        .invalidates(|_, _| {
            vec![
                QueryKey::resource(ADMIN_CATEGORIES),
                QueryKey::resource(CATEGORIES),
            ]
        })
        .success_message("Category created successfully")
    }

    pub async fn create_category(&self, input: NewCategory) -> Result<(), ApiError> {
        self.run_validated(&self.create_category_mutation(), input, NewCategory::validate)
            .await
    }

    pub fn update_category_mutation(&self) -> MutationDescriptor<UpdateCategoryDto, ()> {
        self.unit_mutation("update_category", |input: &UpdateCategoryDto| {
            ApiRequest::patch(format!("{CATEGORIES}/{}", input.id)).json(input)
        })
        .invalidates(|input, _| {
            vec![category_key(input.id), QueryKey::resource(ADMIN_CATEGORIES)]
        })
        .success_message("Category updated successfully")
    }

    pub async fn update_category(&self, input: UpdateCategoryDto) -> Result<(), ApiError> {
        self.run_validated(&self.update_category_mutation(), input, |input| {
            forms::validate_category_update(input.name.as_deref(), input.description.as_deref())
        })
        .await
    }

    pub fn update_thumbnail_mutation(&self) -> MutationDescriptor<CategoryThumbnail, ()> {
        self.unit_mutation("update_category_thumbnail", |input: &CategoryThumbnail| {
            Ok(
                ApiRequest::patch(format!("{CATEGORIES}/{}/thumbnail", input.category_id))
                    .multipart(MultipartBody::new().file(FilePart {
                        field: "image".to_string(),
                        ..input.image.clone()
                    })),
            )
        })
        .invalidates(|input, _| {
            vec![
                category_key(input.category_id),
                QueryKey::resource(ADMIN_CATEGORIES),
            ]
        })
        .success_message("Thumbnail updated successfully")
    }

    pub async fn update_thumbnail(&self, input: CategoryThumbnail) -> Result<(), ApiError> {
        self.run_validated(&self.update_thumbnail_mutation(), input, |input| {
            forms::validate_image("image", &input.image)
        })
        .await
    }

    pub fn delete_category_mutation(&self) -> MutationDescriptor<i64, ()> {
        self.unit_mutation("delete_category", |id: &i64| {
            Ok(ApiRequest::delete(format!("{CATEGORIES}/{id}")))
        })
        .invalidates(|_, _| {
            vec![
                QueryKey::resource(ADMIN_CATEGORIES),
                QueryKey::resource(CATEGORIES),
            ]
        })
        .success_message("Category deleted successfully")
    }

    pub async fn delete_category(&self, id: i64) -> Result<(), ApiError> {
        Ok(self
            .queries
            .mutate(&self.delete_category_mutation(), id)
            .await?)
    }
}
