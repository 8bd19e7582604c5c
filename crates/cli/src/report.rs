//! Text and CSV renderings of load results.

use std::io;
use std::time::Duration;

use buildload_core::{ResultSet, Stage, StageTiming};
use tabled::settings::Style;
use tabled::{Table, Tabled};

const FOOTNOTE: &str = "Minimum, mean, median and maximum are computed for every stage on its own, \
so a row can combine values of different runs.";

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    stage: &'static str,
    #[tabled(rename = "Minimum")]
    minimum: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Median")]
    median: String,
    #[tabled(rename = "Maximum")]
    maximum: String,
}

/// Table of one result set with its headline and footnote.
pub fn result_table(result: &ResultSet) -> String {
    let rows: Vec<StageRow> = Stage::ALL
        .into_iter()
        .filter(|stage| result.median.contains(*stage))
        .map(|stage| StageRow {
            stage: stage.name(),
            minimum: format_duration(result.minimum.get(stage)),
            mean: format_duration(result.mean.get(stage)),
            median: format_duration(result.median.get(stage)),
            maximum: format_duration(result.maximum.get(stage)),
        })
        .collect();

    let plural = if result.count == 1 { "" } else { "s" };
    let mut table = Table::new(rows);
    table.with(Style::modern());

    format!(
        "Results based on {} parallel {}{plural}\n{table}\n{FOOTNOTE}\n",
        result.count, result.entity_type
    )
}

fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(duration) => format!("{duration:.2?}"),
        None => "-".to_string(),
    }
}

/// One row per run with every stage in milliseconds.
pub fn write_timings_csv<W: io::Write>(
    entity_type: &str,
    timings: &[StageTiming],
    writer: W,
) -> Result<(), csv::Error> {
    let stages = present_stages(timings.iter());
    let mut csv = csv::Writer::from_writer(writer);

    csv.write_record(header(entity_type, &stages))?;
    for (index, timing) in timings.iter().enumerate() {
        csv.write_record(row((index + 1).to_string(), timing, &stages))?;
    }
    csv.flush()?;
    Ok(())
}

/// One row per series level with the median of every stage in milliseconds.
pub fn write_series_csv<W: io::Write>(series: &[ResultSet], writer: W) -> Result<(), csv::Error> {
    let stages = present_stages(series.iter().map(|result| &result.median));
    let mut csv = csv::Writer::from_writer(writer);

    csv.write_record(header("number of results", &stages))?;
    for result in series {
        csv.write_record(row(result.count.to_string(), &result.median, &stages))?;
    }
    csv.flush()?;
    Ok(())
}

/// Stages present in any timing, in canonical order.
fn present_stages<'a>(timings: impl Iterator<Item = &'a StageTiming> + Clone) -> Vec<Stage> {
    Stage::ALL
        .into_iter()
        .filter(|stage| timings.clone().any(|timing| timing.contains(*stage)))
        .collect()
}

fn header(first: &str, stages: &[Stage]) -> Vec<String> {
    std::iter::once(first.to_string())
        .chain(stages.iter().map(|stage| stage.name().to_string()))
        .collect()
}

fn row(first: String, timing: &StageTiming, stages: &[Stage]) -> Vec<String> {
    std::iter::once(first)
        .chain(stages.iter().map(|stage| {
            timing
                .get(*stage)
                .map(|d| d.as_millis().to_string())
                .unwrap_or_default()
        }))
        .collect()
}
