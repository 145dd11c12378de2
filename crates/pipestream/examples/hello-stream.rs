//! Prefix every row with `Hello` using a small shell child.
//!
//! Run with: `cargo run -p pipestream --example hello-stream`

use pipestream::codec::Value;
use pipestream::{Batch, Column, ColumnData, MemorySink, SessionOptions, StreamSession, StreamSettings};

const CHILD: &str = r#"
while IFS= read -r n; do
  if [ "$n" -eq 0 ]; then echo 0; exit 0; fi
  echo "$n"
  i=0
  while [ "$i" -lt "$n" ]; do
    IFS= read -r line
    printf 'Hello\t%s\n' "$line"
    i=$((i + 1))
  done
done
"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let strings = |v: &[&str]| ColumnData::String(v.iter().map(|s| Some(s.to_string())).collect());
    let batch = Batch::new(vec![
        Column::new("x", strings(&["a", "1"])),
        Column::new("y", strings(&["b", "2"])),
    ])?;

    let settings = StreamSettings::parse(CHILD, ["format=tsv"])?;
    let session = StreamSession::launch(settings, &batch.schema(), SessionOptions::default())?;
    let mut sink = MemorySink::new(1);
    let summary = session.run([batch], &mut sink)?;

    for (position, row) in sink.rows() {
        if let Some(Value::String(text)) = row.first() {
            println!("chunk {}:\n{text}", position.chunk_no);
        }
    }
    println!("sent {} rows in {} batches", summary.rows_sent, summary.batches);
    Ok(())
}
