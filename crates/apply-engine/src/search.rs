//! Search executor: one query in, a vec of postings out. Extraction is
//! card-by-card and lossy on purpose; a half-broken card is logged and
//! skipped, never fatal.

use std::sync::Arc;

use autoapply_core_types::{Posting, PostingId, SearchQuery};
use browser_port::{BrowserSession, ElementHandle, SelectorSpec, WaitCondition};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::{PostingError, SearchError};
use crate::selectors::PlatformProfile;

pub struct SearchExecutor {
    profile: Arc<PlatformProfile>,
}

impl SearchExecutor {
    pub fn new(profile: Arc<PlatformProfile>) -> Self {
        Self { profile }
    }

    /// Build the search URL: keywords space-joined in their given order,
    /// location as its own parameter, both percent-encoded by the `url`
    /// crate.
    pub fn build_search_url(&self, query: &SearchQuery) -> Result<Url, SearchError> {
        let mut url = Url::parse(&self.profile.search_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.keywords.is_empty() {
                pairs.append_pair(&self.profile.keywords_param, &query.keywords.join(" "));
            }
            if !query.location.trim().is_empty() {
                pairs.append_pair(&self.profile.location_param, query.location.trim());
            }
        }
        Ok(url)
    }

    pub async fn search(
        &self,
        session: &dyn BrowserSession,
        query: &SearchQuery,
    ) -> Result<Vec<Posting>, SearchError> {
        let url = self.build_search_url(query)?;
        info!(target: "apply-engine", url = %url, "running search");

        match session.navigate(url.as_str(), self.profile.waits.nav()).await {
            Ok(()) => {}
            Err(err) if err.is_timeout() => return Err(SearchError::NavigationTimeout),
            Err(err) => return Err(SearchError::Session(err)),
        }

        let container = WaitCondition::ElementVisible(self.profile.results_container.clone());
        match session
            .wait_for(&container, self.profile.waits.search())
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_timeout() => return Err(SearchError::NavigationTimeout),
            Err(err) => return Err(SearchError::Session(err)),
        }

        let cards = session.locate_all(&self.profile.result_card).await?;
        if cards.is_empty() {
            return Err(SearchError::NoResults);
        }

        let page_url = Url::parse(&session.current_url().await?)?;

        let mut postings = Vec::with_capacity(cards.len());
        for (index, card) in cards.iter().enumerate() {
            match self.extract_posting(session, &page_url, card).await {
                Ok(posting) => {
                    debug!(
                        target: "apply-engine",
                        index,
                        posting = %posting.id,
                        quick_apply = posting.quick_apply,
                        "extracted result card"
                    );
                    postings.push(posting);
                }
                Err(err) => {
                    warn!(
                        target: "apply-engine",
                        index,
                        %err,
                        "skipping unextractable result card"
                    );
                }
            }
        }

        info!(
            target: "apply-engine",
            cards = cards.len(),
            postings = postings.len(),
            "search complete"
        );
        Ok(postings)
    }

    /// Pull one posting out of a result card. Title and link form the
    /// identity; their absence fails the card. Company and location are
    /// descriptive and degrade to empty strings.
    async fn extract_posting(
        &self,
        session: &dyn BrowserSession,
        page_url: &Url,
        card: &ElementHandle,
    ) -> Result<Posting, PostingError> {
        let title_handle = session
            .locate_within(card, &self.profile.card_title)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    PostingError::ExtractionFailure("title")
                } else {
                    PostingError::Session(err)
                }
            })?;
        let title = session.text_of(&title_handle).await?.trim().to_string();
        if title.is_empty() {
            return Err(PostingError::ExtractionFailure("title"));
        }

        let link_handle = session
            .locate_within(card, &self.profile.card_link)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    PostingError::ExtractionFailure("link")
                } else {
                    PostingError::Session(err)
                }
            })?;
        let href = session
            .attribute_of(&link_handle, "href")
            .await?
            .ok_or(PostingError::ExtractionFailure("href"))?;
        let absolute = page_url
            .join(href.trim())
            .map_err(|_| PostingError::ExtractionFailure("href"))?;

        let company = self
            .optional_text(session, card, &self.profile.card_company)
            .await?;
        let location = self
            .optional_text(session, card, &self.profile.card_location)
            .await?;

        let quick_apply = match session
            .locate_within(card, &self.profile.card_quick_apply_badge)
            .await
        {
            Ok(_) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(PostingError::Session(err)),
        };

        let url = absolute.to_string();
        Ok(Posting {
            id: PostingId::from_url(&url),
            url,
            title,
            company,
            location,
            quick_apply,
        })
    }

    async fn optional_text(
        &self,
        session: &dyn BrowserSession,
        card: &ElementHandle,
        spec: &SelectorSpec,
    ) -> Result<String, PostingError> {
        match session.locate_within(card, spec).await {
            Ok(handle) => Ok(session.text_of(&handle).await?.trim().to_string()),
            Err(err) if err.is_not_found() => Ok(String::new()),
            Err(err) => Err(PostingError::Session(err)),
        }
    }
}
