use std::io::{self, Write};

use serde::Serialize;

use crate::domain::EntityCategory;
use crate::summary::{EntitySummary, ProjectSummary, SubmissionSummary};

/// Category order of the project TSV report.
const PROJECT_TSV_ORDER: [EntityCategory; 4] = [
    EntityCategory::Protocol,
    EntityCategory::Process,
    EntityCategory::Biomaterial,
    EntityCategory::File,
];

/// Category order of the submission TSV report.
const SUBMISSION_TSV_ORDER: [EntityCategory; 5] = [
    EntityCategory::Protocol,
    EntityCategory::Process,
    EntityCategory::Biomaterial,
    EntityCategory::File,
    EntityCategory::Project,
];

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        Self::write(&mut io::stdout().lock(), value)
    }

    pub fn write<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Two-row tab separated report: specific type names, then their counts.
pub struct TsvOutput;

impl TsvOutput {
    pub fn print_project(summary: &ProjectSummary) -> io::Result<()> {
        Self::write_project(&mut io::stdout().lock(), summary)
    }

    pub fn print_submission(summary: &SubmissionSummary) -> io::Result<()> {
        Self::write_submission(&mut io::stdout().lock(), summary)
    }

    pub fn write_project<W: Write>(out: &mut W, summary: &ProjectSummary) -> io::Result<()> {
        let summaries = PROJECT_TSV_ORDER.map(|category| summary.for_category(category));
        Self::write_rows(out, &summaries)
    }

    pub fn write_submission<W: Write>(out: &mut W, summary: &SubmissionSummary) -> io::Result<()> {
        let summaries = SUBMISSION_TSV_ORDER.map(|category| summary.for_category(category));
        Self::write_rows(out, &summaries)
    }

    fn write_rows<W: Write>(out: &mut W, summaries: &[&EntitySummary]) -> io::Result<()> {
        let pairs = summaries
            .iter()
            .flat_map(|summary| summary.breakdown.iter())
            .collect::<Vec<_>>();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(out);
        writer
            .write_record(pairs.iter().map(|(name, _)| name.as_str()))
            .map_err(io::Error::other)?;
        writer
            .write_record(pairs.iter().map(|(_, value)| value.count.to_string()))
            .map_err(io::Error::other)?;
        writer.flush()
    }
}
