use crate::cli::commands::OutputFormat;
use crate::schema::Record;
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeSet;

/// Renders result records in the requested format
pub fn render(records: &[Record], format: OutputFormat, pretty: bool) -> Result<String> {
    let value = serde_json::to_value(records)?;
    match format {
        OutputFormat::Json => {
            if pretty {
                Ok(serde_json::to_string_pretty(&value)?)
            } else {
                Ok(serde_json::to_string(&value)?)
            }
        }
        OutputFormat::Table => Ok(format_as_table(&value)),
    }
}

fn format_as_table(result: &Value) -> String {
    let Some(values) = result.as_array() else {
        return "Invalid result format\n".to_string();
    };
    if values.is_empty() {
        return "No records found.".to_string();
    }

    let columns: Vec<&String> = values
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|obj| obj.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let cells: Vec<Vec<String>> = values
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| {
            columns
                .iter()
                .map(|col| obj.get(col.as_str()).map(cell).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(col.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |row: Vec<&str>| -> String {
        row.iter()
            .zip(&widths)
            .map(|(text, width)| format!("{:<width$}", text, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut output = String::new();
    output.push_str(&line(columns.iter().map(|c| c.as_str()).collect()));
    output.push('\n');
    output.push_str(&"-".repeat(widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1)));
    output.push('\n');
    for row in &cells {
        output.push_str(line(row.iter().map(String::as_str).collect()).trim_end());
        output.push('\n');
    }
    output.push_str(&format!("\nTotal records: {}\n", cells.len()));
    output
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => "...".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        vec![
            Record::new().with("OrderId", 10248).with("Country", "France"),
            Record::new().with("OrderId", 10249),
        ]
    }

    #[test]
    fn test_table_pads_columns() {
        let table = render(&records(), OutputFormat::Table, false).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "Country | OrderId");
        assert_eq!(lines[1], "-".repeat(17));
        assert_eq!(lines[2], "France  | 10248");
        assert_eq!(lines[3], "        | 10249");
        assert!(table.ends_with("Total records: 2\n"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(render(&[], OutputFormat::Table, false).unwrap(), "No records found.");
    }

    #[test]
    fn test_json() {
        let json = render(&records(), OutputFormat::Json, false).unwrap();
        assert_eq!(json, r#"[{"Country":"France","OrderId":10248},{"OrderId":10249}]"#);
    }
}
