use actix_web::http::header;
use actix_web::HttpResponse;

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Renders rows as RFC 4180 CSV with CRLF line endings.
pub fn to_csv(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for line in std::iter::once(headers).chain(rows.iter().map(Vec::as_slice)) {
        let fields: Vec<String> = line.iter().map(|f| escape_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

pub fn csv_attachment(filename: &str, body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(body)
}

/// File-name-safe version of a title.
pub fn slug(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let trimmed: Vec<&str> = slug.split('-').filter(|s| !s.is_empty()).collect();
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_fields_that_need_it() {
        let headers = vec!["id".to_string(), "comment".to_string()];
        let rows = vec![vec!["r1".to_string(), "Good, \"mostly\"".to_string()]];
        assert_eq!(
            to_csv(&headers, &rows),
            "id,comment\r\nr1,\"Good, \"\"mostly\"\"\"\r\n"
        );
    }

    #[test]
    fn slugs_are_ascii() {
        assert_eq!(slug("Q3 Climate Survey!"), "q3-climate-survey");
        assert_eq!(slug("¿?"), "export");
    }
}
