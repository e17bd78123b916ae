use std::fmt::Write;

use papervision::JobRecord;

/// Renders job records as a table, newest first. Failed jobs get their
/// error on a follow-up line, others their latest progress note.
pub fn jobs_table(mut records: Vec<JobRecord>) -> String {
    if records.is_empty() {
        return "No jobs found.\n".to_string();
    }
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10} {:<12} {:<10} {:<20}",
        "Document", "State", "Duration", "Created"
    );
    let _ = writeln!(out, "{}", "-".repeat(55));

    for record in &records {
        let duration = record
            .duration_seconds()
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "N/A".to_string());
        let created = record
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(
            out,
            "{:<10} {:<12} {:<10} {}",
            record.document_id.to_string(),
            record.state,
            duration,
            created
        );

        if let Some(error) = &record.error {
            let _ = writeln!(out, "{:<10} Error: {}", "", error);
        } else if let Some(progress) = &record.progress_message {
            let _ = writeln!(out, "{:<10} Progress: {}", "", progress);
        }
    }
    out
}
