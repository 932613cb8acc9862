// Read-only view of the catalog service: price and seller of a book or judgment
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use shared::utils::http_client::{HttpClientError, ServiceClient};
use std::time::Duration;

use crate::domain::payment::{ContentFormat, ItemType, SellerType};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatalogItem {
    pub item_id: i32,
    pub item_type: ItemType,
    pub title: String,
    pub seller_id: i32,
    pub seller_type: SellerType,
    pub pdf_price: Option<BigDecimal>,
    pub text_price: Option<BigDecimal>,
    pub approved: bool,
}

impl CatalogItem {
    pub fn price_for(&self, format: ContentFormat) -> Option<&BigDecimal> {
        match format {
            ContentFormat::Pdf => self.pdf_price.as_ref(),
            ContentFormat::Text => self.text_price.as_ref(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn find_item(&self, item_type: ItemType, item_id: i32) -> AppResult<Option<CatalogItem>>;
}

pub struct HttpCatalog {
    client: ServiceClient,
}

impl HttpCatalog {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = ServiceClient::new("catalog", timeout)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CatalogLookup for HttpCatalog {
    async fn find_item(&self, item_type: ItemType, item_id: i32) -> AppResult<Option<CatalogItem>> {
        let endpoint = format!("/api/internal/items/{}/{}", item_type, item_id);

        match self.client.get::<CatalogItem>(&endpoint, None).await {
            Ok(item) => Ok(Some(item)),
            Err(HttpClientError::NotFound(_)) => Ok(None),
            Err(e) => {
                tracing::error!("Catalog lookup failed for {}:{}: {}", item_type, item_id, e);
                Err(AppError::from(e))
            }
        }
    }
}
