use once_cell::sync::Lazy;
use std::env;

pub static BASE_URL: Lazy<String> = Lazy::new(|| {
    env::var("MAGENTO_BASE_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "http://localhost".to_string())
});

pub static ACCESS_TOKEN: Lazy<Option<String>> = Lazy::new(|| {
    env::var("MAGENTO_ACCESS_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())
});

pub static MEDIA_PATH: Lazy<String> = Lazy::new(|| {
    env::var("MAGENTO_MEDIA_PATH").unwrap_or_else(|_| "/rest/V1/products/{sku}/media".to_string())
});

/// Where per-SKU media entries are posted.
#[derive(Debug, Clone)]
pub struct MagentoEndpoint {
    pub base_url: String,
    pub access_token: Option<String>,
    /// Path template; `{sku}` is replaced by the URL-encoded SKU.
    pub media_path: String,
}

impl MagentoEndpoint {
    pub fn from_env() -> Self {
        Self {
            base_url: BASE_URL.clone(),
            access_token: ACCESS_TOKEN.clone(),
            media_path: MEDIA_PATH.clone(),
        }
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
            media_path: "/rest/V1/products/{sku}/media".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn media_url(&self, sku: &str) -> String {
        let path = self
            .media_path
            .replace("{sku}", &urlencoding::encode(sku));
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}
