use std::sync::Arc;

use vitrine_api_types::{
    DeleteImageDto, PaginationResponse, ProductCardDto, ProductDto, ProductFilter,
    ProductInAdminDto, UpdateDetailsProductDto,
};

use super::forms::{self, NewProduct};
use super::{ApiError, DEFAULT_PAGE_SIZE, Storefront};
use crate::cache::{
    InfiniteQueryHandle, MutationDescriptor, QueryError, QueryHandle, QueryKey, QueryOptions,
};
use crate::transport::{ApiRequest, FilePart, MultipartBody};

pub const PRODUCTS: &str = "products";
pub const ADMIN_PRODUCTS: &str = "admin-products";

pub type ProductPage = PaginationResponse<ProductCardDto>;
pub type AdminProductPage = PaginationResponse<ProductInAdminDto>;

pub fn product_key(id: i64) -> QueryKey {
    QueryKey::resource(PRODUCTS).with(id)
}

/// Key of the infinite storefront listing; the page cursor is not part of it.
pub fn products_key(filter: &ProductFilter) -> Result<QueryKey, QueryError> {
    QueryKey::resource(PRODUCTS).try_with(&ProductFilter {
        page: None,
        ..filter.clone()
    })
}

pub fn admin_products_key(filter: &ProductFilter) -> Result<QueryKey, QueryError> {
    QueryKey::resource(ADMIN_PRODUCTS).try_with(filter)
}

/// A new image for an existing product.
#[derive(Debug, Clone)]
pub struct ProductImage {
    pub product_id: i64,
    pub image: FilePart,
}

impl Storefront {
    pub async fn product(&self, id: i64) -> Result<Arc<ProductDto>, QueryError> {
        self.queries
            .fetch_query(
                product_key(id),
                self.get_fetcher(format!("{PRODUCTS}/{id}"), ()),
                QueryOptions::new(),
            )
            .await
    }

    pub fn use_product(&self, id: i64) -> Result<QueryHandle<ProductDto>, QueryError> {
        self.queries.use_query(
            product_key(id),
            self.get_fetcher(format!("{PRODUCTS}/{id}"), ()),
            QueryOptions::new(),
        )
    }

    /// Storefront listing, one page per cursor starting at 0.
    pub fn use_products(
        &self,
        filter: &ProductFilter,
    ) -> Result<InfiniteQueryHandle<ProductPage>, QueryError> {
        let key = products_key(filter)?;
        let filter = filter.clone();
        let session = Arc::clone(&self.session);
        self.queries.use_infinite_query(
            key,
            move |page| {
                let session = Arc::clone(&session);
                let request = ApiRequest::get(PRODUCTS).params(&ProductFilter {
                    page: Some(page),
                    size: filter.size.or(Some(DEFAULT_PAGE_SIZE)),
                    ..filter.clone()
                });
                async move { session.send::<ProductPage>(request?).await }
            },
            QueryOptions::new(),
        )
    }

    pub async fn admin_products(
        &self,
        filter: &ProductFilter,
    ) -> Result<Arc<AdminProductPage>, QueryError> {
        self.queries
            .fetch_query(
                admin_products_key(filter)?,
                self.get_fetcher("admin/products".to_string(), filter.clone()),
                QueryOptions::new(),
            )
            .await
    }

    pub fn use_admin_products(
        &self,
        filter: &ProductFilter,
    ) -> Result<QueryHandle<AdminProductPage>, QueryError> {
        self.queries.use_query(
            admin_products_key(filter)?,
            self.get_fetcher("admin/products".to_string(), filter.clone()),
            QueryOptions::new(),
        )
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn create_product_mutation(&self) -> MutationDescriptor<NewProduct, ()> {
        self.unit_mutation("create_product", |input: &NewProduct| {
            Ok(ApiRequest::post(PRODUCTS).multipart(input.to_multipart()))
        })
        .invalidates(|_, _| {
            vec![
                QueryKey::resource(PRODUCTS),
                QueryKey::resource(ADMIN_PRODUCTS),
            ]
        })
        .success_message("Product created successfully")
    }

    pub async fn create_product(&self, input: NewProduct) -> Result<(), ApiError> {
        self.run_validated(&self.create_product_mutation(), input, NewProduct::validate)
            .await
    }

    pub fn update_product_mutation(&self) -> MutationDescriptor<UpdateDetailsProductDto, ()> {
        self.unit_mutation("update_product", |input: &UpdateDetailsProductDto| {
            ApiRequest::patch(format!("{PRODUCTS}/{}", input.id)).json(input)
        })
        .invalidates(|input, _| vec![product_key(input.id), QueryKey::resource(ADMIN_PRODUCTS)])
        .success_message("Product updated successfully")
    }

    pub async fn update_product(&self, input: UpdateDetailsProductDto) -> Result<(), ApiError> {
        Ok(self
            .queries
            .mutate(&self.update_product_mutation(), input)
            .await?)
    }

    pub fn add_image_mutation(&self) -> MutationDescriptor<ProductImage, ()> {
        self.unit_mutation("add_product_image", |input: &ProductImage| {
            Ok(
                ApiRequest::post(format!("{PRODUCTS}/{}/images", input.product_id)).multipart(
                    MultipartBody::new().file(FilePart {
                        field: "image".to_string(),
                        ..input.image.clone()
                    }),
                ),
            )
        })
        .invalidates(|input, _| vec![product_key(input.product_id)])
        .success_message("Add image successfully")
    }

    pub async fn add_image(&self, input: ProductImage) -> Result<(), ApiError> {
        self.run_validated(&self.add_image_mutation(), input, |input| {
            forms::validate_image("image", &input.image)
        })
        .await
    }

    pub fn delete_image_mutation(&self) -> MutationDescriptor<DeleteImageDto, ()> {
        self.unit_mutation("delete_product_image", |input: &DeleteImageDto| {
            Ok(ApiRequest::delete(format!(
                "{PRODUCTS}/{}/images/{}",
                input.product_id, input.image_id
            )))
        })
        .invalidates(|input, _| vec![product_key(input.product_id)])
        .success_message("Image deleted successfully")
    }

    pub fn delete_product_mutation(&self) -> MutationDescriptor<i64, ()> {
        self.unit_mutation("delete_product", |id: &i64| {
            Ok(ApiRequest::delete(format!("{PRODUCTS}/{id}")))
        })
        .invalidates(|_, _| {
            vec![
                QueryKey::resource(PRODUCTS),
                QueryKey::resource(ADMIN_PRODUCTS),
            ]
        })
        .success_message("Product deleted successfully")
    }
}
