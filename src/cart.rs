//! The download cart as seen by one session, and selection against a view's id list.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::{CartEntityType, CartItem, DownloadCart};
use crate::download_api::DownloadClient;
use crate::error::GatewayError;

/// Client-side copy of the server cart, unique by `(entity_type, entity_id)`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    items: Vec<CartItem>,
    #[serde(skip)]
    revision: u64,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Changes every time the contents are replaced.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, entity_type: CartEntityType, entity_id: u64) -> bool {
        self.items
            .iter()
            .any(|item| item.entity_type == entity_type && item.entity_id == entity_id)
    }

    pub fn ids_of(&self, entity_type: CartEntityType) -> impl Iterator<Item = u64> + '_ {
        self.items
            .iter()
            .filter(move |item| item.entity_type == entity_type)
            .map(|item| item.entity_id)
    }

    /// Replaces the contents with a server response, dropping duplicate items.
    pub fn replace(&mut self, cart: DownloadCart) {
        let mut seen = HashSet::new();
        self.items = cart
            .cart_items
            .into_iter()
            .filter(|item| seen.insert((item.entity_type, item.entity_id)))
            .collect();
        self.revision += 1;
    }
}

/// `{ item.entity_id | item.entity_type == entity_type } ∩ all_ids`, in `all_ids` order.
pub fn selected_rows(cart: &Cart, all_ids: &[u64], entity_type: CartEntityType) -> Vec<u64> {
    let in_cart: HashSet<u64> = cart.ids_of(entity_type).collect();
    all_ids
        .iter()
        .copied()
        .filter(|id| in_cart.contains(id))
        .collect()
}

/// Whether every currently known row is selected. An empty universe is never "all selected".
pub fn all_selected(selected: &[u64], all_ids: &[u64]) -> bool {
    !all_ids.is_empty() && selected.len() == all_ids.len()
}

/// Caches [`selected_rows`] until the cart, the id list or the type changes.
#[derive(Debug, Clone, Default)]
pub struct SelectionMemo {
    key: Option<(u64, u64, CartEntityType)>,
    selected: Vec<u64>,
}

impl SelectionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(
        &mut self,
        cart: &Cart,
        all_ids: &[u64],
        all_ids_revision: u64,
        entity_type: CartEntityType,
    ) -> &[u64] {
        let key = (cart.revision(), all_ids_revision, entity_type);
        if self.key != Some(key) {
            self.selected = selected_rows(cart, all_ids, entity_type);
            self.key = Some(key);
        }
        &self.selected
    }
}

/// Cart mutations. The local cart only changes after the server confirms.
#[derive(Clone)]
pub struct CartEngine<D: DownloadClient> {
    downloads: Arc<D>,
}

impl<D: DownloadClient> CartEngine<D> {
    pub fn new(downloads: Arc<D>) -> Self {
        Self { downloads }
    }

    pub fn refresh(&self, cart: &mut Cart) -> Result<(), GatewayError> {
        let fresh = self.downloads.cart().inspect_err(log_failure)?;
        cart.replace(fresh);
        Ok(())
    }

    /// Ids already in the cart are skipped; if nothing is left no request is made.
    pub fn add_to_cart(
        &self,
        cart: &mut Cart,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<(), GatewayError> {
        let missing = unique(ids.iter().copied().filter(|id| !cart.contains(entity_type, *id)));
        if missing.is_empty() {
            tracing::debug!(%entity_type, "items already in cart");
            return Ok(());
        }
        let updated = self
            .downloads
            .add_cart_items(entity_type, &missing)
            .inspect_err(log_failure)?;
        cart.replace(updated);
        Ok(())
    }

    pub fn remove_from_cart(
        &self,
        cart: &mut Cart,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<(), GatewayError> {
        let present = unique(ids.iter().copied().filter(|id| cart.contains(entity_type, *id)));
        if present.is_empty() {
            tracing::debug!(%entity_type, "items not in cart");
            return Ok(());
        }
        let updated = self
            .downloads
            .remove_cart_items(entity_type, &present)
            .inspect_err(log_failure)?;
        cart.replace(updated);
        Ok(())
    }

    pub fn clear(&self, cart: &mut Cart) -> Result<(), GatewayError> {
        let updated = self.downloads.clear_cart().inspect_err(log_failure)?;
        cart.replace(updated);
        Ok(())
    }
}

fn unique(ids: impl Iterator<Item = u64>) -> Vec<u64> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}

fn log_failure(err: &GatewayError) {
    tracing::error!("cart request failed: {err}");
}
