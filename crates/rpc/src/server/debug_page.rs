//! HTML page listing services, methods and call counts.

use crate::registry::Service;

use std::fmt::Write;
use std::sync::Arc;

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub(super) fn render(services: &[Arc<Service>]) -> String {
    let mut page = String::from("<html>\n<body>\n<title>aRPC Services</title>\n");

    for service in services {
        let name = escape(service.name());
        let _ = write!(
            page,
            "<hr>\nService {name}\n<hr>\n<table>\n<th align=center>Method</th><th align=center>Calls</th>\n"
        );
        for method in service.methods() {
            let _ = writeln!(
                page,
                "<tr>\n<td align=left font=fixed>{name}.{}</td>\n<td align=center>{}</td>\n</tr>",
                escape(method.name()),
                method.num_calls()
            );
        }
        page.push_str("</table>\n");
    }

    page.push_str("</body>\n</html>\n");
    page
}
