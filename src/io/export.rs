//! CSV export for simulation step records.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::Result;
use crate::sim::runner::StepRecord;

/// Column header, one row per step.
const HEADER: &str = "step,at_ms,total_kw,soft_limit_kw,headroom_kw,shedding,\
                       in_shortfall,devices_on,shed,restored,swapped_out,denied";

/// Exports step records to a CSV file at the given path.
///
/// Produces deterministic output for identical inputs.
///
/// # Arguments
///
/// * `records` - Complete simulation step records
/// * `path` - Output file path
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be created and `Error::Csv` if a
/// row cannot be written.
pub fn export_csv(records: &[StepRecord], path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_csv(records, io::BufWriter::new(file))
}

/// Writes step records as CSV to any writer.
///
/// Device lists are joined with `;`. Unknown headroom is an empty cell.
pub fn write_csv(records: &[StepRecord], writer: impl Write) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in records {
        wtr.write_record(&[
            r.step.to_string(),
            r.at_ms.to_string(),
            format!("{:.4}", r.total_kw),
            format!("{:.4}", r.soft_limit_kw),
            r.headroom_kw.map(|h| format!("{h:.4}")).unwrap_or_default(),
            r.shedding.to_string(),
            r.in_shortfall.to_string(),
            r.devices_on.to_string(),
            r.shed.join(";"),
            r.restored.join(";"),
            r.swapped_out.join(";"),
            r.denied.join(";"),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(step: usize) -> StepRecord {
        StepRecord {
            step,
            at_ms: 1_000 * step as i64,
            total_kw: 3.5,
            soft_limit_kw: 4.8,
            headroom_kw: if step == 0 { None } else { Some(1.3) },
            shedding: false,
            in_shortfall: false,
            devices_on: 2,
            shed: Vec::new(),
            restored: if step == 1 {
                vec!["dryer".into(), "ev".into()]
            } else {
                Vec::new()
            },
            swapped_out: Vec::new(),
            denied: Vec::new(),
            cycle_error: false,
        }
    }

    #[test]
    fn header_and_rows() {
        let mut buf = Vec::new();
        write_csv(&[make_record(0), make_record(1)], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("step,at_ms,total_kw"));
        assert_eq!(lines[0].split(',').count(), 12);
        assert!(lines[1].starts_with("0,0,3.5000,4.8000,,false"));
        assert!(lines[2].contains("dryer;ev"));
    }

    #[test]
    fn deterministic_output() {
        let records = vec![make_record(0), make_record(1)];
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_csv(&records, &mut a).unwrap();
        write_csv(&records, &mut b).unwrap();
        assert_eq!(a, b);
    }
}
