use std::sync::Arc;

use vitrine_api_types::{PaginationResponse, UpdateUserStatusDto, UserDto, UserFilter};

use super::{ApiError, Storefront};
use crate::cache::{MutationDescriptor, QueryError, QueryHandle, QueryKey, QueryOptions};
use crate::transport::ApiRequest;

pub const USERS: &str = "users";
pub const ADMIN_USERS: &str = "admin-users";

pub type AdminUserPage = PaginationResponse<UserDto>;

pub fn user_key(id: i64) -> QueryKey {
    QueryKey::resource(USERS).with(id)
}

pub fn admin_users_key(filter: &UserFilter) -> Result<QueryKey, QueryError> {
    QueryKey::resource(ADMIN_USERS).try_with(filter)
}

impl Storefront {
    pub async fn user(&self, id: i64) -> Result<Arc<UserDto>, QueryError> {
        self.queries
            .fetch_query(
                user_key(id),
                self.get_fetcher(format!("{USERS}/{id}"), ()),
                QueryOptions::new(),
            )
            .await
    }

    pub fn use_user(&self, id: i64) -> Result<QueryHandle<UserDto>, QueryError> {
        self.queries.use_query(
            user_key(id),
            self.get_fetcher(format!("{USERS}/{id}"), ()),
            QueryOptions::new(),
        )
    }

    pub async fn admin_users(&self, filter: &UserFilter) -> Result<Arc<AdminUserPage>, QueryError> {
        self.queries
            .fetch_query(
                admin_users_key(filter)?,
                self.get_fetcher("admin/users".to_string(), filter.clone()),
                QueryOptions::new(),
            )
            .await
    }

    pub fn use_admin_users(
        &self,
        filter: &UserFilter,
    ) -> Result<QueryHandle<AdminUserPage>, QueryError> {
        self.queries.use_query(
            admin_users_key(filter)?,
            self.get_fetcher("admin/users".to_string(), filter.clone()),
            QueryOptions::new(),
        )
    }

    pub fn set_user_active_mutation(&self) -> MutationDescriptor<UpdateUserStatusDto, ()> {
        self.unit_mutation("update_user_status", |input: &UpdateUserStatusDto| {
            ApiRequest::patch(format!("{USERS}/{}/is-active", input.id)).json(input)
        })
        .invalidates(|input, _| vec![user_key(input.id), QueryKey::resource(ADMIN_USERS)])
        .success_message("User status updated successfully")
    }

    pub async fn set_user_active(&self, id: i64, is_active: bool) -> Result<(), ApiError> {
        Ok(self
            .queries
            .mutate(
                &self.set_user_active_mutation(),
                UpdateUserStatusDto { id, is_active },
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::api::testing::{Recording, storefront};
    use crate::transport::RequestBody;

    #[tokio::test(start_paused = true)]
    async fn deactivating_a_user_refreshes_detail_and_leaves_others() {
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let transport = Recording::new(move |request| match request.method.as_str() {
            "PATCH" => {
                flag.store(false, Ordering::SeqCst);
                Ok(Value::Null)
            }
            _ if request.path == "users/7" => Ok(json!({
                "id": 7, "username": "grace", "isActive": flag.load(Ordering::SeqCst)
            })),
            _ => Ok(json!({"id": 8, "username": "alan"})),
        });
        let store = storefront(transport.clone());
        assert!(store.user(7).await.expect("read").is_active);
        store.user(8).await.expect("read other");

        store.set_user_active(7, false).await.expect("updated");
        let patch = transport.last();
        assert_eq!(patch.path, "users/7/is-active");
        match patch.body {
            Some(RequestBody::Json(body)) => assert_eq!(body, json!({"isActive": false})),
            other => panic!("unexpected body {other:?}"),
        }

        assert!(!store.user(7).await.expect("reread").is_active);
        store.user(8).await.expect("cached");
        assert_eq!(transport.count("GET", "users/7"), 2);
        assert_eq!(transport.count("GET", "users/8"), 1);
    }
}
