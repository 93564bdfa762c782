use super::store::{InventoryStore, RebackOutcome};
use shop_tonic_core::{
    Error,
    proto::inventory::{Empty, GoodsInvInfo, SellInfo, inventory_server::Inventory},
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// `inventory.Inventory` backed by an [`InventoryStore`].
#[derive(Debug, Clone)]
pub struct InventoryService {
    store: Arc<InventoryStore>,
}

impl InventoryService {
    pub fn new(store: Arc<InventoryStore>) -> Self {
        Self { store }
    }
}

fn record(method: &'static str) {
    metrics::counter!("inventory_requests_total", "method" => method).increment(1);
}

fn lines(info: &SellInfo) -> Vec<(i32, i32)> {
    info.goods_info.iter().map(|g| (g.goods_id, g.num)).collect()
}

#[tonic::async_trait]
impl Inventory for InventoryService {
    #[tracing::instrument(skip_all, fields(goods_id = req.get_ref().goods_id))]
    async fn set_inv(&self, req: Request<GoodsInvInfo>) -> Result<Response<Empty>, Status> {
        record("set_inv");
        let info = req.into_inner();
        self.store.set(info.goods_id, info.num)?;
        Ok(Response::new(Empty {}))
    }

    async fn inv_detail(
        &self,
        req: Request<GoodsInvInfo>,
    ) -> Result<Response<GoodsInvInfo>, Status> {
        record("inv_detail");
        let goods_id = req.into_inner().goods_id;
        let num = self.store.stock(goods_id)?;
        Ok(Response::new(GoodsInvInfo { goods_id, num }))
    }

    #[tracing::instrument(skip_all, fields(order_sn = %req.get_ref().order_sn))]
    async fn sell(&self, req: Request<SellInfo>) -> Result<Response<Empty>, Status> {
        record("sell");
        let info = req.into_inner();
        self.store.sell(&info.order_sn, &lines(&info))?;
        tracing::debug!("Stock deducted");
        Ok(Response::new(Empty {}))
    }

    /// Returns the stock recorded for the order. The goods listed in the
    /// request are not trusted; a second reback is a no-op.
    #[tracing::instrument(skip_all, fields(order_sn = %req.get_ref().order_sn))]
    async fn reback(&self, req: Request<SellInfo>) -> Result<Response<Empty>, Status> {
        record("reback");
        let order_sn = req.into_inner().order_sn;
        match self.store.reback(&order_sn) {
            RebackOutcome::Restored | RebackOutcome::AlreadyReturned => {
                Ok(Response::new(Empty {}))
            }
            RebackOutcome::Unknown => Err(Error::NotFound {
                entity: format!("order {order_sn}"),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    fn sell_info(order_sn: &str, goods: &[(i32, i32)]) -> Request<SellInfo> {
        Request::new(SellInfo {
            goods_info: goods
                .iter()
                .map(|&(goods_id, num)| GoodsInvInfo { goods_id, num })
                .collect(),
            order_sn: order_sn.to_string(),
        })
    }

    async fn stock(service: &InventoryService, goods_id: i32) -> i32 {
        service
            .inv_detail(Request::new(GoodsInvInfo { goods_id, num: 0 }))
            .await
            .unwrap()
            .into_inner()
            .num
    }

    #[tokio::test]
    async fn sell_then_reback_round_trips_stock() {
        let service = InventoryService::new(Arc::default());
        service
            .set_inv(Request::new(GoodsInvInfo {
                goods_id: 421,
                num: 10,
            }))
            .await
            .unwrap();

        service.sell(sell_info("SN-1", &[(421, 7)])).await.unwrap();
        assert_eq!(stock(&service, 421).await, 3);

        service.reback(sell_info("SN-1", &[])).await.unwrap();
        service.reback(sell_info("SN-1", &[])).await.unwrap();
        assert_eq!(stock(&service, 421).await, 10);
    }

    #[tokio::test]
    async fn store_errors_become_status_codes() {
        let service = InventoryService::new(Arc::default());
        service
            .set_inv(Request::new(GoodsInvInfo {
                goods_id: 421,
                num: 1,
            }))
            .await
            .unwrap();

        let status = service
            .sell(sell_info("SN-1", &[(421, 2)]))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::ResourceExhausted);

        let status = service.reback(sell_info("SN-404", &[])).await.unwrap_err();
        assert_eq!(status.code(), Code::NotFound);

        let status = service
            .inv_detail(Request::new(GoodsInvInfo {
                goods_id: 7,
                num: 0,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
