use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DownloadAction, DownloadResult, ProgressEvent, ProgressSink, UrlResult};
use crate::domain::{Catalog, FileFormat, Hierarchy, RegionNode};
use crate::index::DownloadIndexEntry;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress goes through tracing only, so stdout stays valid JSON.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        tracing::debug!(message = %event.message);
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_lines<I, S>(lines: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stdout = io::stdout().lock();
        for line in lines {
            writeln!(stdout, "{}", line.as_ref())?;
        }
        Ok(())
    }

    pub fn print_index(entries: &[DownloadIndexEntry]) -> io::Result<()> {
        Self::print_lines(entries.iter().map(index_line))
    }

    pub fn print_catalog(catalog: &Catalog) -> io::Result<()> {
        Self::print_lines(catalog.rows().iter().map(|row| {
            format!(
                "{}\t{}\t{}",
                row.subregion,
                row.osm_pbf_size.as_deref().unwrap_or("-"),
                row.osm_pbf.as_deref().unwrap_or("-")
            )
        }))
    }

    pub fn print_tier(hierarchy: &Hierarchy) -> io::Result<()> {
        let mut lines = Vec::new();
        for region in &hierarchy.regions {
            push_tree(&mut lines, region, 0);
        }
        Self::print_lines(lines)
    }

    pub fn print_url(result: &UrlResult) -> io::Result<()> {
        let url = result.url.as_deref().unwrap_or("(not available)");
        Self::print_lines([format!("{}\t{}\t{url}", result.region, result.format)])
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for item in &result.items {
            let status = match &item.action {
                DownloadAction::Downloaded => "downloaded".to_string(),
                DownloadAction::Updated => "updated".to_string(),
                DownloadAction::AlreadyAvailable => "already available".to_string(),
                DownloadAction::Declined => "cancelled".to_string(),
                DownloadAction::Unavailable => "not available".to_string(),
                DownloadAction::Failed { error } => format!("failed: {error}"),
            };
            writeln!(
                stdout,
                "{} [{}] {status}{}",
                item.region,
                item.format,
                item.path
                    .as_deref()
                    .map(|path| format!(" ({path})"))
                    .unwrap_or_default()
            )?;
        }
        writeln!(
            stdout,
            "{} downloaded, {} updated, {} already available, {} failed",
            result.count(&DownloadAction::Downloaded),
            result.count(&DownloadAction::Updated),
            result.count(&DownloadAction::AlreadyAvailable),
            result.failures()
        )?;
        Ok(())
    }
}

fn index_line(entry: &DownloadIndexEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        entry.id,
        entry.name,
        entry.parent.as_deref().unwrap_or("-"),
        entry.url(FileFormat::OsmPbf).unwrap_or("-")
    )
}

fn push_tree(lines: &mut Vec<String>, node: &RegionNode, depth: usize) {
    lines.push(format!("{}{}", "  ".repeat(depth), node.name));
    for child in node.children() {
        push_tree(lines, child, depth + 1);
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
