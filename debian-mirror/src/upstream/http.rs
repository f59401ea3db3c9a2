// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP access to upstream release hosts. */

use {
    crate::{
        config::MirrorConfig,
        error::{MirrorError, Result},
        upstream::github::Release,
    },
    async_trait::async_trait,
    futures::{stream::TryStreamExt, AsyncRead},
    reqwest::{
        header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
        Client, Url,
    },
    std::{pin::Pin, time::Duration},
};

/// Media type requested from the releases API.
pub const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Network operations the resolvers and pool depend on.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Follow redirects from `url` and return the final URL.
    async fn resolve_redirect(&self, url: &str) -> Result<String>;

    /// List recent releases of `owner/repo`, newest first.
    async fn list_releases(&self, repository: &str, per_page: usize) -> Result<Vec<Release>>;

    /// Obtain the body of `url` as a stream.
    async fn fetch(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;
}

/// [UpstreamClient] backed by [reqwest].
#[derive(Debug)]
pub struct HttpUpstreamClient {
    /// Client for metadata calls. Carries the metadata timeout.
    metadata: Client,
    /// Client for artifact downloads. Carries the download timeout.
    download: Client,
    api_url: Url,
    token: Option<String>,
}

impl HttpUpstreamClient {
    pub fn new(config: &MirrorConfig) -> Result<Self> {
        let metadata = Self::client(config, config.metadata_timeout())?;
        let download = Self::client(config, config.download_timeout())?;

        let mut api_url = Url::parse(&config.github_api_url)?;
        if !api_url.path().ends_with('/') {
            api_url.set_path(&format!("{}/", api_url.path()));
        }

        Ok(Self {
            metadata,
            download,
            api_url,
            token: config.github_token.clone(),
        })
    }

    fn client(config: &MirrorConfig, timeout: Duration) -> Result<Client> {
        Ok(Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.metadata_timeout())
            .timeout(timeout)
            .build()?)
    }

    fn api_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_MEDIA_TYPE));

        if let Some(token) = &self.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| MirrorError::Config(format!("invalid API token: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    /// URL of the releases listing of `owner/repo`.
    pub fn releases_url(&self, repository: &str, per_page: usize) -> Result<Url> {
        let mut url = self
            .api_url
            .join(&format!("repos/{}/releases", repository.trim_matches('/')))?;
        url.query_pairs_mut()
            .append_pair("per_page", &per_page.to_string());

        Ok(url)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn resolve_redirect(&self, url: &str) -> Result<String> {
        let res = self
            .metadata
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.url().to_string())
    }

    async fn list_releases(&self, repository: &str, per_page: usize) -> Result<Vec<Release>> {
        let url = self.releases_url(repository, per_page)?;

        let res = self
            .metadata
            .get(url)
            .headers(self.api_headers()?)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json::<Vec<Release>>().await?)
    }

    async fn fetch(&self, url: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let res = self
            .download
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        Ok(Box::pin(
            res.bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
                .into_async_read(),
        ))
    }
}
