use parking_lot::Mutex;
use shop_tonic_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// State of the stock deducted for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellStatus {
    Deducted,
    Returned,
}

/// What a reback did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebackOutcome {
    /// The deducted stock was put back.
    Restored,
    /// The order was already returned; nothing changed.
    AlreadyReturned,
    /// No sell was recorded for the order; nothing changed.
    Unknown,
}

impl RebackOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::AlreadyReturned => "already_returned",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
struct SellDetail {
    goods: BTreeMap<i32, i32>,
    status: SellStatus,
}

#[derive(Debug, Default)]
struct Inner {
    stocks: HashMap<i32, i32>,
    sells: HashMap<String, SellDetail>,
}

/// In-memory stock levels plus the per-order record of what was deducted.
///
/// Every operation takes the lock once, so a sell or a reback is applied to
/// all of its goods or to none.
#[derive(Debug, Default)]
pub struct InventoryStore {
    inner: Mutex<Inner>,
}

impl InventoryStore {
    /// Sets the stock of `goods_id`, creating it if needed.
    pub fn set(&self, goods_id: i32, num: i32) -> Result<()> {
        if goods_id <= 0 {
            return Err(invalid(format!("invalid goods id {goods_id}")));
        }
        if num < 0 {
            return Err(invalid(format!("stock of goods {goods_id} cannot be negative")));
        }
        self.inner.lock().stocks.insert(goods_id, num);
        Ok(())
    }

    pub fn stock(&self, goods_id: i32) -> Result<i32> {
        self.inner
            .lock()
            .stocks
            .get(&goods_id)
            .copied()
            .ok_or_else(|| Error::NotFound {
                entity: format!("goods {goods_id}"),
            })
    }

    /// Deducts stock for every line of an order and records the deduction
    /// under `order_sn`.
    ///
    /// Lines for the same goods are summed. Nothing is deducted unless every
    /// line can be satisfied.
    pub fn sell(&self, order_sn: &str, lines: &[(i32, i32)]) -> Result<()> {
        if order_sn.is_empty() {
            return Err(invalid("order sn must not be empty".to_string()));
        }
        if lines.is_empty() {
            return Err(invalid(format!("order {order_sn} has no goods")));
        }

        let mut goods = BTreeMap::new();
        for &(goods_id, num) in lines {
            if num <= 0 {
                return Err(invalid(format!(
                    "quantity of goods {goods_id} must be positive"
                )));
            }
            let total: &mut i32 = goods.entry(goods_id).or_insert(0);
            *total = total.checked_add(num).ok_or_else(|| {
                invalid(format!("quantity of goods {goods_id} is out of range"))
            })?;
        }

        let mut inner = self.inner.lock();
        if inner.sells.contains_key(order_sn) {
            return Err(Error::AlreadyExists {
                entity: format!("order {order_sn}"),
            });
        }
        for (&goods_id, &requested) in &goods {
            let available = inner
                .stocks
                .get(&goods_id)
                .copied()
                .ok_or_else(|| Error::NotFound {
                    entity: format!("goods {goods_id}"),
                })?;
            if available < requested {
                return Err(Error::InsufficientStock {
                    goods_id,
                    requested,
                    available,
                });
            }
        }

        for (goods_id, num) in &goods {
            if let Some(stock) = inner.stocks.get_mut(goods_id) {
                *stock -= num;
            }
        }
        inner.sells.insert(
            order_sn.to_string(),
            SellDetail {
                goods,
                status: SellStatus::Deducted,
            },
        );
        Ok(())
    }

    /// Restores the stock recorded for `order_sn` if it is still deducted.
    ///
    /// Safe to repeat: only the first call for a deducted order changes
    /// anything. Stock raised in the meantime saturates at `i32::MAX`.
    pub fn reback(&self, order_sn: &str) -> RebackOutcome {
        let mut inner = self.inner.lock();
        let Inner { stocks, sells } = &mut *inner;

        let Some(detail) = sells.get_mut(order_sn) else {
            return RebackOutcome::Unknown;
        };
        if detail.status == SellStatus::Returned {
            return RebackOutcome::AlreadyReturned;
        }

        for (goods_id, num) in &detail.goods {
            let stock = stocks.entry(*goods_id).or_insert(0);
            *stock = stock.saturating_add(*num);
        }
        detail.status = SellStatus::Returned;
        RebackOutcome::Restored
    }

    pub fn sell_status(&self, order_sn: &str) -> Option<SellStatus> {
        self.inner.lock().sells.get(order_sn).map(|d| d.status)
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidRequest { reason }
}
