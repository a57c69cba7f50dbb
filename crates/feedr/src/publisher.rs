use std::sync::Arc;

use feedr_util_error::FmtCompact as _;
use snafu::Snafu;
use tracing::{debug, info, warn};

use crate::compose::ComposedMessage;
use crate::entry::FeedEntry;
use crate::image::{self, ImageError, ImageFetcher};
use crate::social::{PostId, SocialClient, SocialError};

const LOG_TARGET: &str = "feedr::publisher";

#[derive(Debug, Snafu)]
pub enum PublishError {
    /// Every post attempt was refused by the platform.
    #[snafu(display("Platform rejected post: {source}"))]
    PlatformRejected { source: SocialError },
    #[snafu(display("Could not reach platform: {source}"))]
    Network { source: SocialError },
}

pub type PublishResult<T> = std::result::Result<T, PublishError>;

impl From<SocialError> for PublishError {
    fn from(source: SocialError) -> Self {
        if source.is_rejection() {
            PublishError::PlatformRejected { source }
        } else {
            PublishError::Network { source }
        }
    }
}

/// Posts feed entries to the social account.
///
/// Holds no state between calls besides the injected clients.
pub struct Publisher {
    social: Arc<dyn SocialClient>,
    images: Arc<dyn ImageFetcher>,
}

impl Publisher {
    pub fn new(social: Arc<dyn SocialClient>, images: Arc<dyn ImageFetcher>) -> Self {
        Self { social, images }
    }

    pub fn social(&self) -> &Arc<dyn SocialClient> {
        &self.social
    }

    /// Publish `entry`, degrading the post until the platform accepts it.
    ///
    /// 1. With an image found in the entry body: post with the image attached.
    /// 2. Post as text, with the image URL appended if it could not be
    ///    attached.
    /// 3. Post as text without the summary.
    ///
    /// Only platform rejections move on to the next step; transport errors
    /// are returned right away.
    pub async fn publish(&self, entry: &FeedEntry) -> PublishResult<PostId> {
        let img_url = entry.body_html().and_then(image::extract_image_url);
        let mut message = ComposedMessage::compose(entry, img_url.as_deref());

        info!(
            target: LOG_TARGET,
            title = %entry.title,
            has_image = img_url.is_some(),
            "Publishing update"
        );

        if let Some(img_url) = img_url {
            match self.post_with_image(&message, &img_url).await {
                Ok(id) => return Ok(id),
                Err(MediaFailure::Image(err)) => {
                    warn!(
                        target: LOG_TARGET,
                        %img_url,
                        err = %err.fmt_compact(),
                        "Cannot download image, posting with media URL"
                    );
                }
                Err(MediaFailure::Social(err)) if err.is_rejection() => {
                    warn!(
                        target: LOG_TARGET,
                        err = %err.fmt_compact(),
                        "Cannot post with media, posting with media URL"
                    );
                }
                Err(MediaFailure::Social(err)) => return Err(err.into()),
            }
            message.img_url = Some(img_url);
        }

        match self.social.post(&message.render()).await {
            Ok(id) => return Ok(id),
            Err(err) if err.is_rejection() => {
                warn!(
                    target: LOG_TARGET,
                    err = %err.fmt_compact(),
                    "Text post rejected, retrying without summary"
                );
            }
            Err(err) => return Err(err.into()),
        }

        let id = self.social.post(&message.without_summary().render()).await?;
        Ok(id)
    }

    /// Download the image and post it along with the message text.
    async fn post_with_image(
        &self,
        message: &ComposedMessage,
        img_url: &str,
    ) -> Result<PostId, MediaFailure> {
        // Dropping `image` removes its temp file, whichever way we leave
        let mut image = self
            .images
            .fetch(img_url)
            .await
            .map_err(MediaFailure::Image)?;
        let bytes = image.read_bytes().map_err(MediaFailure::Image)?;

        debug!(target: LOG_TARGET, %img_url, size = bytes.len(), "Posting with media");
        self.social
            .post_with_media(&message.media_text(), &bytes)
            .await
            .map_err(MediaFailure::Social)
    }
}

enum MediaFailure {
    Image(ImageError),
    Social(SocialError),
}
