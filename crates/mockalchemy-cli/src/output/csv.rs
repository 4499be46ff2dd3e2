use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use mockalchemy_core::{CREATED_AT_FIELD, ID_FIELD, NodeKind, Record, SchemaNode, UPDATED_AT_FIELD};

/// Columns exported for a collection: the schema's top-level primitive
/// fields in schema order, with the id and timestamps the store stamps.
pub fn csv_columns(schema: &SchemaNode) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    if let Some(shape) = schema.shape() {
        columns.extend(
            shape
                .iter()
                .filter(|(_, node)| matches!(node.kind, NodeKind::Primitive(_)))
                .map(|(name, _)| name.clone()),
        );
    }
    if !columns.iter().any(|column| column == ID_FIELD) {
        columns.insert(0, ID_FIELD.to_string());
    }
    for stamp in [CREATED_AT_FIELD, UPDATED_AT_FIELD] {
        if !columns.iter().any(|column| column == stamp) {
            columns.push(stamp.to_string());
        }
    }
    columns
}

/// Write records as CSV. Returns the number of bytes written.
pub fn write_collection_csv(
    path: &Path,
    schema: &SchemaNode,
    records: &[Record],
) -> Result<u64, csv::Error> {
    let writer = BufWriter::new(File::create(path).map_err(csv::Error::from)?);
    let counting = CountingWriter::new(writer);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(counting);

    let columns = csv_columns(schema);
    writer.write_record(&columns)?;

    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| record.get(column).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }

    writer.flush()?;
    let counting = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(counting.bytes_written())
}

/// Strings are written bare, nulls empty, anything nested as compact JSON.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> SchemaNode {
        SchemaNode::object([
            ("name", SchemaNode::string()),
            ("tags", SchemaNode::array(SchemaNode::string())),
            ("age", SchemaNode::integer()),
            ("owner", SchemaNode::join("owner", Some("name"))),
        ])
    }

    #[test]
    fn columns_follow_schema_order_with_stamps() {
        assert_eq!(
            csv_columns(&schema()),
            vec!["id", "name", "age", "createdAt", "updatedAt"]
        );
    }

    #[test]
    fn nested_values_are_json_encoded() {
        let dir = std::env::temp_dir().join(format!("mockalchemy_cli_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("people.csv");
        let record = json!({
            "id": "p1",
            "name": "Ada, Countess",
            "age": {"years": 36},
            "createdAt": "2024-01-01T00:00:00.000Z",
        });
        let Value::Object(record) = record else {
            unreachable!()
        };

        let bytes = write_collection_csv(&path, &schema(), &[record]).expect("csv");
        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(bytes, content.len() as u64);
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("id,name,age,createdAt,updatedAt"));
        assert_eq!(
            lines.next(),
            Some(r#"p1,"Ada, Countess","{""years"":36}",2024-01-01T00:00:00.000Z,"#)
        );

        std::fs::remove_dir_all(dir).ok();
    }
}
