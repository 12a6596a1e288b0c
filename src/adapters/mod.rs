//! Site adapters: one per festival website.
//!
//! An adapter owns nothing but its parse state. Every film, section,
//! screen and screening it discovers is materialized through the identity
//! registry, combination fragments go into the run's [`CombinationLinks`],
//! and recoverable problems into the [`RunReport`]. Re-running an adapter
//! over the same pages creates no duplicates; identity is the registry's
//! natural-key upsert plus screening set-semantics.

pub mod idfa;

use async_trait::async_trait;

use crate::config::FestivalConfig;
use crate::error::Result;
use crate::fetch::PageSource;
use crate::registry::FestivalData;
use crate::report::RunReport;
use crate::resolver::CombinationLinks;

#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Adapter key, matching the `festival` config field.
    fn festival(&self) -> &'static str;

    /// Crawl the site: fetch pages through `pages`, parse them, and
    /// register everything found. Pages are parsed to completion in
    /// sequence; registry mutation stays on the calling thread.
    async fn run(
        &self,
        pages: &dyn PageSource,
        data: &mut FestivalData,
        links: &mut CombinationLinks,
        report: &mut RunReport,
    ) -> Result<()>;
}

pub fn create_adapter(config: &FestivalConfig) -> Option<Box<dyn SiteAdapter>> {
    match config.festival.as_str() {
        idfa::FESTIVAL => Some(Box::new(idfa::IdfaAdapter::new(config))),
        _ => None,
    }
}
