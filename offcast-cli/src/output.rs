//! Formatting for command results, in pretty and JSON flavors.

use indicatif::{ProgressBar, ProgressStyle};
use providers_resolver::StreamDescriptor;
use vodio_engine::{JobSnapshot, PersistedDownload, WatchProgress};

use crate::cli::OutputFormat;

pub fn format_descriptor(
    descriptor: &StreamDescriptor,
    format: OutputFormat,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(descriptor)?)),
        OutputFormat::Pretty => {
            let mut out = String::new();
            out.push_str("Stream resolved:\n");
            out.push_str(&format!("  Provider:   {}\n", descriptor.provider));
            out.push_str(&format!("  Stream URL: {}\n", descriptor.stream_url));
            if let Some(server) = &descriptor.selected_server {
                out.push_str(&format!("  Server:     {server}\n"));
            }
            if !descriptor.quality_variants.is_empty() {
                out.push_str(&format!(
                    "  Qualities:  {}\n",
                    descriptor.quality_variants.join(", ")
                ));
            }
            if !descriptor.subtitles.is_empty() {
                out.push_str("  Subtitles:\n");
                for track in &descriptor.subtitles {
                    out.push_str(&format!("    {}: {}\n", track.language, track.url));
                }
            }
            Ok(out)
        }
    }
}

pub fn format_record(record: &PersistedDownload, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(record)?)),
        OutputFormat::Pretty => {
            let mut out = String::new();
            out.push_str("Saved:\n");
            out.push_str(&format!("  Key:       {}\n", record.key));
            out.push_str(&format!("  Title:     {}\n", record.title));
            out.push_str(&format!("  Kind:      {}\n", record.kind));
            out.push_str(&format!("  Path:      {}\n", record.local_path.display()));
            if let Some(label) = &record.quality_label {
                out.push_str(&format!("  Quality:   {label}\n"));
            }
            if let Some(bytes) = record.total_bytes {
                out.push_str(&format!("  Size:      {}\n", format_bytes(bytes)));
            }
            if !record.subtitle_paths.is_empty() {
                let languages: Vec<&str> = record
                    .subtitle_paths
                    .iter()
                    .map(|sub| sub.language.as_str())
                    .collect();
                out.push_str(&format!("  Subtitles: {}\n", languages.join(", ")));
            }
            out.push_str(&format!("  Completed: {}\n", record.completed_at));
            Ok(out)
        }
    }
}

pub fn format_snapshot(snapshot: &JobSnapshot, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(snapshot)?)),
        OutputFormat::Pretty => {
            let mut line = format!("{} {}", snapshot.key, snapshot.phase);
            if let Some(progress) = snapshot.progress {
                line.push_str(&format!(" {:.0}%", progress * 100.0));
            }
            let detail = transfer_detail(snapshot);
            if !detail.is_empty() {
                line.push_str(&format!(" ({detail})"));
            }
            if let Some(error) = &snapshot.error {
                line.push_str(&format!(": {error}"));
            }
            line.push('\n');
            Ok(line)
        }
    }
}

pub fn format_jobs(jobs: &[JobSnapshot], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(jobs)?)),
        OutputFormat::Pretty if jobs.is_empty() => Ok("No download jobs.\n".to_string()),
        OutputFormat::Pretty => {
            let mut out = String::new();
            for snapshot in jobs {
                out.push_str(&format_snapshot(snapshot, OutputFormat::Pretty)?);
            }
            Ok(out)
        }
    }
}

pub fn format_progress(progress: &WatchProgress) -> String {
    format!(
        "{}: {:.0}s / {:.0}s ({:.0}% watched)\n",
        progress.key,
        progress.position_ms as f64 / 1000.0,
        progress.duration_ms as f64 / 1000.0,
        progress.fraction * 100.0
    )
}

/// Bar the pretty download loop drives from job snapshots.
pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .expect("Failed to build progress bar template")
            .progress_chars("#>-"),
    );
    bar
}

pub fn render_progress(bar: &ProgressBar, snapshot: &JobSnapshot) {
    if let Some(progress) = snapshot.progress {
        bar.set_position((f64::from(progress) * 100.0).round() as u64);
    }
    let detail = transfer_detail(snapshot);
    if detail.is_empty() {
        bar.set_message(snapshot.phase.to_string());
    } else {
        bar.set_message(format!("{} {detail}", snapshot.phase));
    }
}

fn transfer_detail(snapshot: &JobSnapshot) -> String {
    match (snapshot.segments_done, snapshot.segments_total) {
        (Some(done), Some(total)) => format!("{done}/{total} segments"),
        _ => match (snapshot.bytes_done, snapshot.bytes_total) {
            (Some(done), Some(total)) => {
                format!("{} / {}", format_bytes(done), format_bytes(total))
            }
            (Some(done), None) => format_bytes(done),
            _ => String::new(),
        },
    }
}

/// Format bytes into human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vodio_engine::JobPhase;

    #[test]
    fn bytes_format_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn snapshot_line_includes_transfer_detail() {
        let mut snapshot = JobSnapshot::new("movie:603");
        snapshot.phase = JobPhase::Transferring;
        snapshot.progress = Some(0.5);
        snapshot.segments_done = Some(6);
        snapshot.segments_total = Some(12);

        let line = format_snapshot(&snapshot, OutputFormat::Pretty).unwrap();
        assert_eq!(line, "movie:603 transferring 50% (6/12 segments)\n");
    }

    #[test]
    fn empty_job_list_prints_a_notice() {
        let out = format_jobs(&[], OutputFormat::Pretty).unwrap();
        assert_eq!(out, "No download jobs.\n");
    }
}
