use parking_lot::RwLock;
use shop_tonic_core::{Error, Result};
use std::collections::BTreeSet;

/// In-memory set of `(user_id, goods_id)` favourites.
#[derive(Debug, Default)]
pub struct UserFavStore {
    favs: RwLock<BTreeSet<(i32, i32)>>,
}

impl UserFavStore {
    /// Lists favourites matching both filters. A filter of `0` matches any id.
    pub fn list(&self, user_id: i32, goods_id: i32) -> Vec<(i32, i32)> {
        self.favs
            .read()
            .iter()
            .filter(|(u, g)| (user_id == 0 || *u == user_id) && (goods_id == 0 || *g == goods_id))
            .copied()
            .collect()
    }

    pub fn add(&self, user_id: i32, goods_id: i32) -> Result<()> {
        validate(user_id, goods_id)?;
        if !self.favs.write().insert((user_id, goods_id)) {
            return Err(Error::AlreadyExists {
                entity: entity(user_id, goods_id),
            });
        }
        Ok(())
    }

    pub fn remove(&self, user_id: i32, goods_id: i32) -> Result<()> {
        if !self.favs.write().remove(&(user_id, goods_id)) {
            return Err(Error::NotFound {
                entity: entity(user_id, goods_id),
            });
        }
        Ok(())
    }

    pub fn contains(&self, user_id: i32, goods_id: i32) -> bool {
        self.favs.read().contains(&(user_id, goods_id))
    }
}

fn validate(user_id: i32, goods_id: i32) -> Result<()> {
    if user_id <= 0 || goods_id <= 0 {
        return Err(Error::InvalidRequest {
            reason: format!("user id {user_id} and goods id {goods_id} must be positive"),
        });
    }
    Ok(())
}

fn entity(user_id: i32, goods_id: i32) -> String {
    format!("favourite of user {user_id} for goods {goods_id}")
}
