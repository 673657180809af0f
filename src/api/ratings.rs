use std::sync::Arc;

use serde::Serialize;
use vitrine_api_types::{CreateRatingDto, DeleteRatingDto, PaginationResponse, RatingDto};

use super::forms;
use super::{ApiError, DEFAULT_PAGE_SIZE, Storefront};
use crate::cache::{InfiniteQueryHandle, MutationDescriptor, QueryError, QueryKey, QueryOptions};
use crate::transport::ApiRequest;

pub const RATINGS: &str = "ratings";

pub type RatingPage = PaginationResponse<RatingDto>;

pub fn ratings_key(product_id: i64) -> QueryKey {
    QueryKey::resource(RATINGS).with(product_id)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RatingParams {
    product_id: i64,
    page: u32,
    size: u32,
}

impl Storefront {
    /// Ratings of one product, newest pages appended as they are requested.
    pub fn use_ratings(
        &self,
        product_id: i64,
    ) -> Result<InfiniteQueryHandle<RatingPage>, QueryError> {
        let session = Arc::clone(&self.session);
        self.queries.use_infinite_query(
            ratings_key(product_id),
            move |page| {
                let session = Arc::clone(&session);
                let request = ApiRequest::get(RATINGS).params(&RatingParams {
                    product_id,
                    page,
                    size: DEFAULT_PAGE_SIZE,
                });
                async move { session.send::<RatingPage>(request?).await }
            },
            QueryOptions::new(),
        )
    }

    pub fn create_rating_mutation(&self) -> MutationDescriptor<CreateRatingDto, ()> {
        self.unit_mutation("create_rating", |input: &CreateRatingDto| {
            ApiRequest::post(RATINGS).json(input)
        })
        .invalidates(|input, _| vec![ratings_key(input.product_id)])
    }

    pub async fn create_rating(&self, input: CreateRatingDto) -> Result<(), ApiError> {
        self.run_validated(&self.create_rating_mutation(), input, forms::validate_rating)
            .await
    }

    pub fn delete_rating_mutation(&self) -> MutationDescriptor<DeleteRatingDto, ()> {
        self.unit_mutation("delete_rating", |input: &DeleteRatingDto| {
            Ok(ApiRequest::delete(format!("{RATINGS}/{}", input.comment_id)))
        })
        .invalidates(|input, _| vec![ratings_key(input.product_id)])
        .success_message("Comment deleted successfully")
    }

    pub async fn delete_rating(&self, input: DeleteRatingDto) -> Result<(), ApiError> {
        Ok(self
            .queries
            .mutate(&self.delete_rating_mutation(), input)
            .await?)
    }
}
