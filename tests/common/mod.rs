use livetab::source::MarkupRenderer;
use livetab::{PayloadCache, PayloadCodec, Session};
use std::sync::Arc;

/// A small document with a header row, markup and a date column.
pub const PEOPLE_DOC: &str = "\
Some prose before the table.

|=Name|=Role|=Joined
|**Ada**|engineer|1815-12-10
|Alan|Engineer|1912-06-23
|//Grace//|admiral|1906-12-09
|Edsger|professor|unknown

Trailing prose.
";

pub const ISO_DATE: &str = "%Y-%m-%d";

pub fn session(cache: Option<Arc<PayloadCache>>) -> Session<MarkupRenderer> {
    Session::new(
        MarkupRenderer::new().expect("markup patterns compile"),
        PayloadCodec::default(),
        cache,
        10,
    )
    .with_date_formats(vec![ISO_DATE.to_string()])
}

/// Plain-text values of one column across the returned entries.
pub fn column_text(entries: &[livetab::Entry], ordinal: usize) -> Vec<String> {
    entries
        .iter()
        .map(|e| {
            e.get(&format!("text.{}", ordinal))
                .map(|v| v.as_text().into_owned())
                .unwrap_or_default()
        })
        .collect()
}
