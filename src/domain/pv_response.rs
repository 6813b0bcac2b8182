use crate::domain::calendar::{parse_time_of_day, parse_yyyymmdd};

const SECTION_DELIMITER: char = ';';
const ITEM_DELIMITER: char = ',';

/// Read-only view over a service response body: sections separated by `;`,
/// items within a section separated by `,`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    body: String,
}

impl ParsedResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn sections(&self) -> usize {
        if self.body.is_empty() {
            return 0;
        }
        self.body.split(SECTION_DELIMITER).count()
    }

    pub fn items(&self, section: usize) -> usize {
        match self.section(section) {
            Some(text) if !text.is_empty() => text.split(ITEM_DELIMITER).count(),
            _ => 0,
        }
    }

    pub fn item(&self, section: usize, item: usize) -> Option<&str> {
        self.section(section)?.split(ITEM_DELIMITER).nth(item)
    }

    /// Leading signed integer of the item; zero when absent or not numeric.
    pub fn integer(&self, section: usize, item: usize) -> i64 {
        self.item(section, item).map(leading_integer).unwrap_or(0)
    }

    pub fn string(&self, section: usize, item: usize) -> &str {
        self.item(section, item).unwrap_or("")
    }

    pub fn date(&self, section: usize, item: usize) -> Option<i64> {
        self.item(section, item).and_then(parse_yyyymmdd)
    }

    pub fn time(&self, section: usize, item: usize) -> Option<i64> {
        self.item(section, item).and_then(parse_time_of_day)
    }

    pub fn date_time(&self, section: usize, date_item: usize, time_item: usize) -> Option<i64> {
        Some(self.date(section, date_item)? + self.time(section, time_item)?)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.body.contains(needle)
    }

    /// At most `max_len` bytes from the start of the body, cut on a char boundary.
    pub fn peek(&self, max_len: usize) -> &str {
        if self.body.len() <= max_len {
            return &self.body;
        }
        let mut end = max_len;
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        &self.body[..end]
    }

    fn section(&self, section: usize) -> Option<&str> {
        if self.body.is_empty() {
            return None;
        }
        self.body.split(SECTION_DELIMITER).nth(section)
    }
}

fn leading_integer(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0_i64, |acc, digit| {
            acc.saturating_mul(10).saturating_add(i64::from(digit - b'0'))
        });

    if negative { -value } else { value }
}

#[cfg(test)]
mod tests {
    use super::ParsedResponse;

    #[test]
    fn addresses_sections_and_items() {
        let response = ParsedResponse::new("A,B;C,D");

        assert_eq!(response.sections(), 2);
        assert_eq!(response.items(0), 2);
        assert_eq!(response.string(0, 1), "B");
        assert_eq!(response.string(1, 0), "C");
    }

    #[test]
    fn out_of_range_lookups_are_empty_or_zero() {
        let response = ParsedResponse::new("A,B;C,D");

        assert_eq!(response.string(5, 0), "");
        assert_eq!(response.string(0, 9), "");
        assert_eq!(response.integer(3, 3), 0);
        assert_eq!(response.items(7), 0);
        assert_eq!(response.date(4, 0), None);
    }

    #[test]
    fn empty_body_has_no_sections() {
        let response = ParsedResponse::new("");

        assert_eq!(response.sections(), 0);
        assert_eq!(response.items(0), 0);
        assert_eq!(response.string(0, 0), "");
    }

    #[test]
    fn parses_leading_integers_like_strtol() {
        let response = ParsedResponse::new("12abc,-7, 42,x");

        assert_eq!(response.integer(0, 0), 12);
        assert_eq!(response.integer(0, 1), -7);
        assert_eq!(response.integer(0, 2), 42);
        assert_eq!(response.integer(0, 3), 0);
    }

    #[test]
    fn reads_system_service_fields() {
        let body = "Home Solar,4500,2140,18,250,Jinko,1,5000,Fronius,S,45.0,No,20200101,-33.9,151.2,5,5;;1";
        let response = ParsedResponse::new(body);

        assert_eq!(response.string(0, 0), "Home Solar");
        assert_eq!(response.integer(0, 15), 5);
        assert_eq!(response.integer(2, 0), 1);
    }

    #[test]
    fn combines_date_and_time_items() {
        let response = ParsedResponse::new("20240305,07:45,1200,300");

        assert_eq!(response.date_time(0, 0, 1), Some(1_709_624_700));
    }

    #[test]
    fn peek_is_bounded_and_char_safe() {
        let response = ParsedResponse::new("Bad request 400: Möglich");

        assert_eq!(response.peek(3), "Bad");
        assert_eq!(response.peek(200), "Bad request 400: Möglich");
        assert_eq!(response.peek(18), "Bad request 400: M");
        assert_eq!(response.peek(19), "Bad request 400: M");
    }

    #[test]
    fn detects_substrings() {
        let response = ParsedResponse::new("Forbidden 403: Exceeded 60 requests per hour");

        assert!(response.contains("Exceeded"));
        assert!(response.contains("requests per hour"));
        assert!(!response.contains("Load in progress"));
    }
}
