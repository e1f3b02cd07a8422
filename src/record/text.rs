//! Text-line ingest for the batch import format: one record per line,
//! fields separated by `;` in the order
//! `code;title;author;publisher;edition;year;price;stock`.

use super::Book;

/// Parses one import line. Returns `None` when a field is missing or a
/// numeric field fails to parse.
pub fn parse_line(line: &str) -> Option<Book> {
    let mut fields = line.split(';');

    let code = fields.next()?.trim().parse::<i32>().ok()?;
    let title = normalize_whitespace(fields.next()?);
    let author = normalize_whitespace(fields.next()?);
    let publisher = normalize_whitespace(fields.next()?);
    let edition = fields.next()?.trim().parse::<i32>().ok()?;
    let year = fields.next()?.trim().parse::<i32>().ok()?;
    let price = parse_price(fields.next()?)?;
    let stock_quantity = fields.next()?.trim().parse::<i32>().ok()?;

    Some(Book {
        code,
        title,
        author,
        publisher,
        edition,
        year,
        price,
        stock_quantity,
    })
}

/// Parses a price, accepting either `.` or `,` as the decimal separator.
pub fn parse_price(text: &str) -> Option<f64> {
    normalize_decimal_separator(text.trim()).parse::<f64>().ok()
}

/// Strips leading/trailing whitespace and collapses interior runs of
/// whitespace into a single space.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Replaces comma decimal separators with dots so locale-formatted
/// numbers parse.
pub fn normalize_decimal_separator(text: &str) -> String {
    text.replace(',', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let line = "101; The C Programming Language ;Kernighan and Ritchie;Prentice Hall;2;1988;54,90;12";
        let book = parse_line(line).unwrap();

        assert_eq!(book.code, 101);
        assert_eq!(book.title, "The C Programming Language");
        assert_eq!(book.author, "Kernighan and Ritchie");
        assert_eq!(book.publisher, "Prentice Hall");
        assert_eq!(book.edition, 2);
        assert_eq!(book.year, 1988);
        assert_eq!(book.price, 54.90);
        assert_eq!(book.stock_quantity, 12);
    }

    #[test]
    fn test_parse_line_missing_field() {
        assert!(parse_line("101;Title;Author;Publisher;2;1988;54.90").is_none());
    }

    #[test]
    fn test_parse_line_bad_number() {
        assert!(parse_line("abc;Title;Author;Publisher;2;1988;54.90;12").is_none());
        assert!(parse_line("101;Title;Author;Publisher;2;19x8;54.90;12").is_none());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  Olá,   mundo!  "), "Olá, mundo!");
        assert_eq!(normalize_whitespace("\t a \n b "), "a b");
        assert_eq!(normalize_whitespace("   "), "");
    }

    #[test]
    fn test_parse_price_with_comma() {
        assert_eq!(parse_price(" 19,99 "), Some(19.99));
        assert_eq!(parse_price("19.99"), Some(19.99));
        assert_eq!(parse_price("free"), None);
    }
}
