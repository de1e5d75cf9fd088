//! Read-only views of the baseline database.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use integrity_core::SqliteStore;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Table {
    /// Monitored hosts
    Servers,
    /// Current baseline records
    Checksums,
    /// Change history
    Events,
}

/// Opens an existing database read-only; the inspector never creates,
/// migrates or reconfigures one.
pub fn open(path: &Path) -> Result<SqliteStore> {
    if !path.exists() {
        bail!(
            "no database at '{}', run a scan first or pass --database",
            path.display()
        );
    }
    SqliteStore::open_read_only(path)
        .with_context(|| format!("opening database '{}'", path.display()))
}

pub fn inspect(store: &SqliteStore, table: Table, json: bool) -> Result<String> {
    match table {
        Table::Servers => {
            let hosts = store.list_hosts()?;
            if json {
                return Ok(serde_json::to_string_pretty(&hosts)?);
            }
            let rows = hosts
                .iter()
                .map(|h| vec![h.id.to_string(), h.name.clone()])
                .collect::<Vec<_>>();
            Ok(render_grid(&["id", "name"], &rows))
        }
        Table::Checksums => {
            let records = store.list_records()?;
            if json {
                return Ok(serde_json::to_string_pretty(&records)?);
            }
            let rows = records
                .iter()
                .map(|r| {
                    vec![
                        r.id.to_string(),
                        r.host_id.to_string(),
                        r.path.clone(),
                        r.checksum.clone(),
                    ]
                })
                .collect::<Vec<_>>();
            Ok(render_grid(&["id", "host_id", "path", "checksum"], &rows))
        }
        Table::Events => {
            let events = store.list_events()?;
            if json {
                return Ok(serde_json::to_string_pretty(&events)?);
            }
            let rows = events
                .iter()
                .map(|e| {
                    vec![
                        e.id.to_string(),
                        e.host_id.to_string(),
                        e.record_id.map(|id| id.to_string()).unwrap_or_default(),
                        e.kind.to_string(),
                        e.description.clone(),
                        e.timestamp.to_rfc3339(),
                        e.path.clone(),
                        e.checksum.clone(),
                        e.new_checksum.clone().unwrap_or_default(),
                    ]
                })
                .collect::<Vec<_>>();
            Ok(render_grid(
                &[
                    "id",
                    "host_id",
                    "record_id",
                    "kind",
                    "description",
                    "timestamp",
                    "path",
                    "checksum",
                    "new_checksum",
                ],
                &rows,
            ))
        }
    }
}

/// Boxed text table with a double rule under the header.
pub fn render_grid(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = vec![
        grid_rule(&widths, '-'),
        grid_line(&widths, headers.iter().copied()),
        grid_rule(&widths, if rows.is_empty() { '-' } else { '=' }),
    ];
    for row in rows {
        out.push(grid_line(&widths, row.iter().map(String::as_str)));
        out.push(grid_rule(&widths, '-'));
    }
    out.join("\n")
}

fn grid_rule(widths: &[usize], fill: char) -> String {
    let mut line = String::from("+");
    for width in widths {
        line.extend(std::iter::repeat(fill).take(width + 2));
        line.push('+');
    }
    line
}

fn grid_line<'a>(widths: &[usize], cells: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::from("|");
    for (width, cell) in widths.iter().zip(cells) {
        let pad = width - cell.chars().count();
        out.push(' ');
        out.push_str(cell);
        out.extend(std::iter::repeat(' ').take(pad + 1));
        out.push('|');
    }
    out
}
