//! The external services job handlers call out to.
//!
//! Content generation, publishing and crawling are not implemented here;
//! the scheduler only sees these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use quill_store::{
    Article, FailureKind, Link, NewArticle, NewPage, NewTopic, Page, Site, Source, Topic,
    TopicId,
};

/// A topic suggested by the planner.
pub type ProposedTopic = NewTopic;

/// A page found while crawling a site.
pub type DiscoveredPage = NewPage;

/// Errors returned by collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Worth retrying: timeouts, overload, connection trouble.
    #[error("transient collaborator failure: {0}")]
    Transient(String),

    /// The request itself was rejected; retrying cannot help.
    #[error("permanent collaborator failure: {0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CollaboratorError::Transient(_) => FailureKind::Transient,
            CollaboratorError::Permanent(_) => FailureKind::Permanent,
        }
    }
}

/// An article as written by the generator, before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArticle {
    pub title: String,
    pub slug: String,
    pub markdown: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl GeneratedArticle {
    /// Draft for `site`, falling back to the site language.
    pub fn into_new_article(self, site: &Site, topic_id: Option<TopicId>) -> NewArticle {
        NewArticle {
            site_id: site.id,
            topic_id,
            title: self.title,
            slug: self.slug,
            markdown: self.markdown,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            language: self.language.or_else(|| Some(site.language.clone())),
            sources: self.sources,
        }
    }
}

/// Where a published article ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub location: String,
}

#[async_trait]
pub trait ContentPlanner: Send + Sync {
    /// Propose new topics for a site.
    async fn propose(&self, site: &Site) -> Result<Vec<ProposedTopic>, CollaboratorError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Write an article, for `topic` when one was picked.
    async fn write(
        &self,
        site: &Site,
        topic: Option<&Topic>,
    ) -> Result<GeneratedArticle, CollaboratorError>;

    /// Crawl the site and describe its existing pages.
    async fn crawl(&self, site: &Site) -> Result<Vec<DiscoveredPage>, CollaboratorError>;

    /// Suggest internal links from `article` to the site's pages.
    async fn links(
        &self,
        site: &Site,
        article: &Article,
        pages: &[Page],
    ) -> Result<Vec<Link>, CollaboratorError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, site: &Site, article: &Article)
    -> Result<Publication, CollaboratorError>;
}

/// The set of collaborators a dispatcher calls.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn ContentPlanner>,
    pub generator: Arc<dyn ContentGenerator>,
    pub publisher: Arc<dyn Publisher>,
}

impl Collaborators {
    /// Use one value for all three roles.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: ContentPlanner + ContentGenerator + Publisher + 'static,
    {
        Self {
            planner: shared.clone(),
            generator: shared.clone(),
            publisher: shared,
        }
    }
}
