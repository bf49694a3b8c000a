//! Test doubles for the collaborator traits.
//!
//! [`ScriptedCollaborators`] plays planner, generator and publisher at once.
//! Its answers can be changed between calls and every call is counted.

use std::sync::Mutex;

use async_trait::async_trait;

use quill_store::{Article, Link, NewTopic, Page, Site, Topic};

use crate::{
    CollaboratorError, ContentGenerator, ContentPlanner, DiscoveredPage, GeneratedArticle,
    ProposedTopic, Publication, Publisher,
};

/// How many times each collaborator method ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub propose: usize,
    pub write: usize,
    pub crawl: usize,
    pub links: usize,
    pub publish: usize,
}

#[derive(Debug, Default)]
struct Script {
    proposals: Vec<ProposedTopic>,
    pages: Vec<DiscoveredPage>,
    plan_error: Option<CollaboratorError>,
    write_error: Option<CollaboratorError>,
    crawl_error: Option<CollaboratorError>,
    publish_error: Option<CollaboratorError>,
    calls: CallCounts,
}

/// Deterministic stand-in for every collaborator.
///
/// Writes an article titled after the topic keyword (or "Untitled"), links
/// to every known page, and publishes to `https://<domain><slug>`.
#[derive(Debug, Default)]
pub struct ScriptedCollaborators {
    script: Mutex<Script>,
}

impl ScriptedCollaborators {
    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut script)
    }

    /// Topics returned by every planner call.
    pub fn set_proposals(&self, proposals: Vec<ProposedTopic>) {
        self.with_script(|s| s.proposals = proposals);
    }

    /// Pages returned by every crawl.
    pub fn set_pages(&self, pages: Vec<DiscoveredPage>) {
        self.with_script(|s| s.pages = pages);
    }

    pub fn fail_planning(&self, error: CollaboratorError) {
        self.with_script(|s| s.plan_error = Some(error));
    }

    pub fn fail_writing(&self, error: CollaboratorError) {
        self.with_script(|s| s.write_error = Some(error));
    }

    pub fn fail_crawling(&self, error: CollaboratorError) {
        self.with_script(|s| s.crawl_error = Some(error));
    }

    pub fn fail_publish(&self, error: CollaboratorError) {
        self.with_script(|s| s.publish_error = Some(error));
    }

    /// Clear every scripted failure.
    pub fn recover(&self) {
        self.with_script(|s| {
            s.plan_error = None;
            s.write_error = None;
            s.crawl_error = None;
            s.publish_error = None;
        });
    }

    pub fn calls(&self) -> CallCounts {
        self.with_script(|s| s.calls)
    }
}

#[async_trait]
impl ContentPlanner for ScriptedCollaborators {
    async fn propose(&self, _site: &Site) -> Result<Vec<ProposedTopic>, CollaboratorError> {
        self.with_script(|s| {
            s.calls.propose += 1;
            match &s.plan_error {
                Some(e) => Err(e.clone()),
                None => Ok(s.proposals.clone()),
            }
        })
    }
}

#[async_trait]
impl ContentGenerator for ScriptedCollaborators {
    async fn write(
        &self,
        site: &Site,
        topic: Option<&Topic>,
    ) -> Result<GeneratedArticle, CollaboratorError> {
        self.with_script(|s| {
            s.calls.write += 1;
            if let Some(e) = &s.write_error {
                return Err(e.clone());
            }
            let title = topic
                .map(|t| t.primary_keyword.clone())
                .unwrap_or_else(|| "Untitled".to_string());
            let slug = title.to_lowercase().replace(' ', "-");
            Ok(GeneratedArticle {
                markdown: format!("# {}\n\nWritten for {}.", title, site.domain),
                title,
                slug,
                ..Default::default()
            })
        })
    }

    async fn crawl(&self, _site: &Site) -> Result<Vec<DiscoveredPage>, CollaboratorError> {
        self.with_script(|s| {
            s.calls.crawl += 1;
            match &s.crawl_error {
                Some(e) => Err(e.clone()),
                None => Ok(s.pages.clone()),
            }
        })
    }

    async fn links(
        &self,
        _site: &Site,
        _article: &Article,
        pages: &[Page],
    ) -> Result<Vec<Link>, CollaboratorError> {
        self.with_script(|s| s.calls.links += 1);
        Ok(pages
            .iter()
            .map(|p| Link {
                anchor: p.title.clone().unwrap_or_else(|| p.slug.clone()),
                href: p.slug.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl Publisher for ScriptedCollaborators {
    async fn publish(
        &self,
        site: &Site,
        article: &Article,
    ) -> Result<Publication, CollaboratorError> {
        self.with_script(|s| {
            s.calls.publish += 1;
            match &s.publish_error {
                Some(e) => Err(e.clone()),
                None => Ok(Publication {
                    location: format!("https://{}{}", site.domain, article.slug),
                }),
            }
        })
    }
}

/// Shorthand for a batch of keyword-only proposals.
pub fn proposals(keywords: &[&str]) -> Vec<ProposedTopic> {
    keywords.iter().map(|k| NewTopic::keyword(*k)).collect()
}
