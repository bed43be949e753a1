//! The apps resource: the apps an API key can see.

use serde::{Deserialize, Serialize};

use crate::{error::Result, transport::Transport};

/// Largest page the apps resource serves.
pub const MAX_APPS_PAGE: u32 = 200;

const APP_FIELDS: &str = "name,bundleId,primaryLocale,sku";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct App {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: AppAttributes,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppAttributes {
    pub name: String,
    pub bundle_id: String,
    pub sku: String,
    pub primary_locale: String,
}

#[derive(Deserialize)]
struct AppsPage {
    #[serde(default)]
    data: Vec<App>,
}

#[derive(Deserialize)]
struct AppDocument {
    data: App,
}

impl Transport {
    /// Lists up to `limit` apps, clamped to `1..=MAX_APPS_PAGE`.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Transport::get_json`].
    pub async fn list_apps(&self, limit: u32) -> Result<Vec<App>> {
        let limit = limit.clamp(1, MAX_APPS_PAGE);
        let page: AppsPage = self
            .get_json(&format!("/apps?limit={limit}&fields[apps]={APP_FIELDS}"))
            .await?;
        tracing::debug!(apps = page.data.len(), "listed apps");
        Ok(page.data)
    }

    /// # Errors
    ///
    /// Returns [`crate::Error::Api`] when no app has this id, and any other
    /// error from [`Transport::get_json`].
    pub async fn get_app(&self, id: &str) -> Result<App> {
        let document: AppDocument = self.get_json(&format!("/apps/{id}")).await?;
        Ok(document.data)
    }

    /// Makes the smallest authenticated call, proving the credentials work.
    ///
    /// # Errors
    ///
    /// Returns the error the API call failed with.
    pub async fn check_connection(&self) -> Result<()> {
        let _: AppsPage = self.get_json("/apps?limit=1").await?;
        Ok(())
    }
}
