use std::io::{self, Read as _, Seek as _, SeekFrom, Write as _};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use snafu::{ResultExt as _, Snafu};
use tempfile::NamedTempFile;
use tracing::debug;

const LOG_TARGET: &str = "feedr::image";

/// Largest image we will download and attach to a post.
pub const MAX_IMAGE_SIZE: u64 = 5 * 1024 * 1024;

const DOWNLOAD_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Snafu)]
pub enum ImageError {
    #[snafu(display("Image request failed: {source}"))]
    Http { source: reqwest::Error },
    #[snafu(display("Image host returned HTTP {status}"))]
    Status { status: u16 },
    #[snafu(display("Image too large: {size} bytes"))]
    TooLarge { size: u64 },
    #[snafu(display("Temporary image file error: {source}"))]
    Io { source: io::Error },
}

pub type ImageResult<T> = std::result::Result<T, ImageError>;

/// `src` of the first `<img>` in an HTML fragment.
pub fn extract_image_url(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    let selector = Selector::parse("img[src]").ok()?;

    fragment
        .select(&selector)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .find(|src| !src.is_empty())
        .map(ToOwned::to_owned)
}

/// A downloaded image, held in a temporary file that is removed when this
/// value is dropped.
#[derive(Debug)]
pub struct DownloadedImage {
    file: NamedTempFile,
}

impl DownloadedImage {
    pub fn from_bytes(bytes: &[u8]) -> ImageResult<Self> {
        let mut file = NamedTempFile::new().context(IoSnafu)?;
        file.write_all(bytes).context(IoSnafu)?;
        file.flush().context(IoSnafu)?;
        Ok(Self { file })
    }

    pub fn read_bytes(&mut self) -> ImageResult<Vec<u8>> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(0)).context(IoSnafu)?;
        let mut bytes = vec![];
        file.read_to_end(&mut bytes).context(IoSnafu)?;
        Ok(bytes)
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> ImageResult<DownloadedImage>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> ImageResult<DownloadedImage> {
        debug!(target: LOG_TARGET, %url, "Downloading image");

        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .await
            .context(HttpSnafu)?;

        if !response.status().is_success() {
            return StatusSnafu {
                status: response.status().as_u16(),
            }
            .fail();
        }

        if let Some(size) = response.content_length() {
            if MAX_IMAGE_SIZE < size {
                return TooLargeSnafu { size }.fail();
            }
        }

        let bytes = response.bytes().await.context(HttpSnafu)?;
        let size = bytes.len() as u64;
        if MAX_IMAGE_SIZE < size {
            return TooLargeSnafu { size }.fail();
        }

        tokio::task::block_in_place(|| DownloadedImage::from_bytes(&bytes))
    }
}
