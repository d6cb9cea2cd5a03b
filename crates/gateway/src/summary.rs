use crate::routes::RouteSummaryEntry;

/// Render the startup route table as aligned text lines.
///
/// Groups are separated by a blank line.
pub fn render_summary(entries: &[RouteSummaryEntry]) -> Vec<String> {
    let headers = ["Type", "Route", "Handler", "Module"];
    let mut widths = headers.map(str::len);
    for e in entries {
        for (w, cell) in widths.iter_mut().zip([&e.group, &e.pattern, &e.handler, &e.module]) {
            *w = (*w).max(cell.len());
        }
    }

    let row = |cells: [&str; 4]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
        )
        .trim_end()
        .to_string()
    };

    let rule = widths.map(|w| "-".repeat(w));
    let mut lines = vec![
        "Registered HTTP routes".to_string(),
        row(headers),
        row(rule.each_ref().map(String::as_str)),
    ];
    let mut previous: Option<&str> = None;
    for e in entries {
        if previous.is_some_and(|g| g != e.group) {
            lines.push(String::new());
        }
        previous = Some(e.group.as_str());
        lines.push(row([&e.group, &e.pattern, &e.handler, &e.module].map(String::as_str)));
    }
    lines
}
