//! Entity counts per submission and per project.

use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::Add;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::SubmissionSummaryCache;
use crate::config::BrokerConfig;
use crate::domain::{Entity, EntityCategory, SpecificType, Submission};
use crate::error::BrokerError;
use crate::ingest::EntityStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownCount {
    pub count: u64,
}

/// Total count of one category plus its split by specific type.
///
/// `count` always equals the sum of the breakdown counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub count: u64,
    pub breakdown: BTreeMap<String, BreakdownCount>,
}

impl EntitySummary {
    pub fn record(&mut self, specific_type: &SpecificType) {
        self.count += 1;
        self.breakdown
            .entry(specific_type.as_str().to_string())
            .or_default()
            .count += 1;
    }

    pub fn from_types<'a, I>(types: I) -> Self
    where
        I: IntoIterator<Item = &'a SpecificType>,
    {
        let mut summary = Self::default();
        for specific_type in types {
            summary.record(specific_type);
        }
        summary
    }
}

impl Add<&EntitySummary> for &EntitySummary {
    type Output = EntitySummary;

    fn add(self, other: &EntitySummary) -> EntitySummary {
        let mut breakdown = self.breakdown.clone();
        for (key, value) in &other.breakdown {
            breakdown.entry(key.clone()).or_default().count += value.count;
        }
        EntitySummary {
            count: self.count + other.count,
            breakdown,
        }
    }
}

impl Add for EntitySummary {
    type Output = EntitySummary;

    fn add(self, other: EntitySummary) -> EntitySummary {
        &self + &other
    }
}

impl<'a> Sum<&'a EntitySummary> for EntitySummary {
    fn sum<I: Iterator<Item = &'a EntitySummary>>(iter: I) -> Self {
        iter.fold(EntitySummary::default(), |acc, next| &acc + next)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSummary {
    pub biomaterial_summary: EntitySummary,
    pub protocol_summary: EntitySummary,
    pub process_summary: EntitySummary,
    pub file_summary: EntitySummary,
    pub project_summary: EntitySummary,
    pub submission_status: Option<String>,
    pub create_date: Option<String>,
    pub last_updated_date: Option<String>,
}

impl SubmissionSummary {
    pub fn for_category(&self, category: EntityCategory) -> &EntitySummary {
        match category {
            EntityCategory::Biomaterial => &self.biomaterial_summary,
            EntityCategory::Protocol => &self.protocol_summary,
            EntityCategory::Process => &self.process_summary,
            EntityCategory::File => &self.file_summary,
            EntityCategory::Project => &self.project_summary,
        }
    }

    fn slot(&mut self, category: EntityCategory) -> &mut EntitySummary {
        match category {
            EntityCategory::Biomaterial => &mut self.biomaterial_summary,
            EntityCategory::Protocol => &mut self.protocol_summary,
            EntityCategory::Process => &mut self.process_summary,
            EntityCategory::File => &mut self.file_summary,
            EntityCategory::Project => &mut self.project_summary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub biomaterial_summary: EntitySummary,
    pub protocol_summary: EntitySummary,
    pub process_summary: EntitySummary,
    pub file_summary: EntitySummary,
    pub project_summary: EntitySummary,
    pub submission_status: Option<String>,
    pub create_date: Option<String>,
    pub last_updated_date: Option<String>,
}

impl ProjectSummary {
    /// Returns a new summary with the submission's counts added in.
    pub fn add_submission_summary(&self, submission: &SubmissionSummary) -> ProjectSummary {
        ProjectSummary {
            biomaterial_summary: &self.biomaterial_summary + &submission.biomaterial_summary,
            protocol_summary: &self.protocol_summary + &submission.protocol_summary,
            process_summary: &self.process_summary + &submission.process_summary,
            file_summary: &self.file_summary + &submission.file_summary,
            project_summary: &self.project_summary + &submission.project_summary,
            submission_status: self.submission_status.clone(),
            create_date: self.create_date.clone(),
            last_updated_date: self.last_updated_date.clone(),
        }
    }

    pub fn fold<'a, I>(summaries: I) -> ProjectSummary
    where
        I: IntoIterator<Item = &'a SubmissionSummary>,
    {
        summaries
            .into_iter()
            .fold(ProjectSummary::default(), |acc, next| {
                acc.add_submission_summary(next)
            })
    }

    pub fn for_category(&self, category: EntityCategory) -> &EntitySummary {
        match category {
            EntityCategory::Biomaterial => &self.biomaterial_summary,
            EntityCategory::Protocol => &self.protocol_summary,
            EntityCategory::Process => &self.process_summary,
            EntityCategory::File => &self.file_summary,
            EntityCategory::Project => &self.project_summary,
        }
    }
}

/// Computes summaries against the entity store, caching per-submission results.
pub struct SummaryService<S: EntityStore> {
    store: S,
    cache: SubmissionSummaryCache,
    page_size: usize,
}

impl<S: EntityStore> SummaryService<S> {
    pub fn new(store: S, config: &BrokerConfig) -> Self {
        Self::with_cache(
            store,
            SubmissionSummaryCache::new(config.cache_capacity, config.cache_ttl),
            config.page_size,
        )
    }

    pub fn with_cache(store: S, cache: SubmissionSummaryCache, page_size: usize) -> Self {
        Self {
            store,
            cache,
            page_size,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &SubmissionSummaryCache {
        &self.cache
    }

    pub fn summary_for_submission(
        &self,
        submission: &Submission,
    ) -> Result<Arc<SubmissionSummary>, BrokerError> {
        let key = submission.cache_key();
        match self.cache.get(key) {
            Ok(summary) => return Ok(summary),
            Err(miss) => debug!("{miss}, fetching"),
        }

        let mut summary = SubmissionSummary {
            submission_status: submission.status.clone(),
            create_date: submission.submission_date.clone(),
            last_updated_date: submission.update_date.clone(),
            ..SubmissionSummary::default()
        };
        for category in EntityCategory::ALL {
            *summary.slot(category) = self.generate_summary_for_entity(submission, category)?;
        }
        info!(submission = key, "submission summary computed");

        let summary = Arc::new(summary);
        self.cache.insert(key, Arc::clone(&summary));
        Ok(summary)
    }

    /// Lists every entity of `category` in the submission and counts them by specific type.
    pub fn generate_summary_for_entity(
        &self,
        submission: &Submission,
        category: EntityCategory,
    ) -> Result<EntitySummary, BrokerError> {
        let mut summary = EntitySummary::default();
        for entity in self
            .store
            .list_entities(submission, category, self.page_size)
        {
            let entity: Entity = entity?;
            summary.record(entity.specific_type());
        }
        debug!(%category, count = summary.count, "entities counted");
        Ok(summary)
    }

    pub fn summary_for_project(&self, project: &Entity) -> Result<ProjectSummary, BrokerError> {
        let submissions = self.store.submissions_in_project(project)?;
        let mut summaries = Vec::with_capacity(submissions.len());
        for submission in &submissions {
            summaries.push(self.summary_for_submission(submission)?);
        }
        info!(
            project = project.id(),
            submissions = summaries.len(),
            "project summary computed"
        );
        Ok(ProjectSummary::fold(summaries.iter().map(Arc::as_ref)))
    }
}
