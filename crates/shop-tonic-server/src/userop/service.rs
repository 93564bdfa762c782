use super::store::UserFavStore;
use shop_tonic_core::{
    Error,
    proto::userop::{
        Empty, UserFavListResponse, UserFavRequest, UserFavResponse, user_fav_server::UserFav,
    },
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// `userop.UserFav` backed by a [`UserFavStore`].
#[derive(Debug, Clone, Default)]
pub struct UserFavService {
    store: Arc<UserFavStore>,
}

impl UserFavService {
    pub fn new(store: Arc<UserFavStore>) -> Self {
        Self { store }
    }
}

fn record(method: &'static str) {
    metrics::counter!("userop_requests_total", "method" => method).increment(1);
}

#[tonic::async_trait]
impl UserFav for UserFavService {
    async fn get_fav_list(
        &self,
        req: Request<UserFavRequest>,
    ) -> Result<Response<UserFavListResponse>, Status> {
        record("get_fav_list");
        let UserFavRequest { user_id, goods_id } = req.into_inner();
        let data: Vec<_> = self
            .store
            .list(user_id, goods_id)
            .into_iter()
            .map(|(user_id, goods_id)| UserFavResponse { user_id, goods_id })
            .collect();
        let total =
            i32::try_from(data.len()).map_err(|_| Status::internal("too many favourites"))?;
        Ok(Response::new(UserFavListResponse { total, data }))
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = req.get_ref().user_id, goods_id = req.get_ref().goods_id)
    )]
    async fn add_user_fav(&self, req: Request<UserFavRequest>) -> Result<Response<Empty>, Status> {
        record("add_user_fav");
        let UserFavRequest { user_id, goods_id } = req.into_inner();
        self.store.add(user_id, goods_id)?;
        Ok(Response::new(Empty {}))
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = req.get_ref().user_id, goods_id = req.get_ref().goods_id)
    )]
    async fn delete_user_fav(
        &self,
        req: Request<UserFavRequest>,
    ) -> Result<Response<Empty>, Status> {
        record("delete_user_fav");
        let UserFavRequest { user_id, goods_id } = req.into_inner();
        self.store.remove(user_id, goods_id)?;
        Ok(Response::new(Empty {}))
    }

    /// Succeeds when the user has favourited the goods, `NOT_FOUND` otherwise.
    async fn get_user_fav_detail(
        &self,
        req: Request<UserFavRequest>,
    ) -> Result<Response<Empty>, Status> {
        record("get_user_fav_detail");
        let UserFavRequest { user_id, goods_id } = req.into_inner();
        if !self.store.contains(user_id, goods_id) {
            return Err(Error::NotFound {
                entity: format!("favourite of user {user_id} for goods {goods_id}"),
            }
            .into());
        }
        Ok(Response::new(Empty {}))
    }
}
