use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use libris::record::{text, Book};
use libris::store::BookStore;

const DATA_FILE: &str = "books.dat";
const INDEX_FILE: &str = "books.idx";

fn main() {
    let mut store = match BookStore::open(DATA_FILE, INDEX_FILE) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Failed to open the store: {}", err);
            std::process::exit(1);
        }
    };

    loop {
        print_menu();
        match read_line("Choose an option: ") {
            Some(choice) => match choice.trim() {
                "0" => {
                    println!("Bye.");
                    break;
                }
                "1" => register_book(&mut store),
                "2" => remove_book(&mut store),
                "3" => print_book(&store),
                "4" => list_books(&store),
                "5" => print_tree_levels(&store),
                "6" => print_free_lists(&store),
                "7" => print_totals(&store),
                "8" => import_batch(&mut store),
                _ => println!("Invalid option, try again."),
            },
            None => break,
        }
    }
}

fn print_menu() {
    println!();
    println!("|{}|", "-".repeat(44));
    println!("| {:<42} |", "LIBRIS");
    println!("|{}|", "-".repeat(44));
    println!("| {:<42} |", "1. Register a new book");
    println!("| {:<42} |", "2. Remove a book");
    println!("| {:<42} |", "3. Print book data");
    println!("| {:<42} |", "4. List all books");
    println!("| {:<42} |", "5. Print tree by levels");
    println!("| {:<42} |", "6. Print free lists");
    println!("| {:<42} |", "7. Totals");
    println!("| {:<42} |", "8. Batch import from text file");
    println!("| {:<42} |", "0. Quit");
    println!("|{}|", "-".repeat(44));
}

fn register_book(store: &mut BookStore) {
    println!("Enter the book data:");

    let code = read_number("Code: ");
    let title = read_text("Title: ");
    let author = read_text("Author: ");
    let publisher = read_text("Publisher: ");
    let edition = read_number("Edition: ");
    let year = read_number("Year: ");
    let price = read_price("Price: ");
    let stock_quantity = read_number("Stock: ");

    let book = Book {
        code,
        title,
        author,
        publisher,
        edition,
        year,
        price,
        stock_quantity,
    };

    match store.add(&book) {
        Ok(()) => println!("Book registered."),
        Err(err) => println!("Could not register the book: {}", err),
    }
}

fn remove_book(store: &mut BookStore) {
    let code = read_number("Code to remove: ");
    match store.remove(code) {
        Ok(book) => println!("Removed \"{}\".", book.title),
        Err(err) => println!("Could not remove the book: {}", err),
    }
}

fn print_book(store: &BookStore) {
    let code = read_number("Code: ");
    match store.lookup(code) {
        Ok(book) => show_book(&book),
        Err(err) => println!("{}", err),
    }
}

fn show_book(book: &Book) {
    println!();
    println!("=== Book Data ===");
    println!("Code: {}", book.code);
    println!("Title: {}", book.title);
    println!("Author: {}", book.author);
    println!("Publisher: {}", book.publisher);
    println!("Edition: {}", book.edition);
    println!("Year: {}", book.year);
    println!("Price: {:.2}", book.price);
    println!("Stock: {}", book.stock_quantity);
}

fn list_books(store: &BookStore) {
    let books = match store.list_all() {
        Ok(books) => books,
        Err(err) => {
            println!("Could not list the books: {}", err);
            return;
        }
    };

    let rule = "-".repeat(92);
    println!("{}", rule);
    println!(
        "| {:<6} | {:<35} | {:<30} | {:<7} |",
        "Code", "Title", "Author", "Stock"
    );
    println!("{}", rule);

    if books.is_empty() {
        println!("| No books registered.");
    }
    for book in &books {
        println!(
            "| {:<6} | {:<35.35} | {:<30.30} | {:<7} |",
            book.code, book.title, book.author, book.stock_quantity
        );
    }
    println!("{}", rule);
}

fn print_tree_levels(store: &BookStore) {
    match store.tree().levels() {
        Ok(levels) if levels.is_empty() => println!("The tree is empty."),
        Ok(levels) => {
            for (depth, keys) in levels.iter().enumerate() {
                println!("Level {}: {:?}", depth, keys);
            }
        }
        Err(err) => println!("Could not walk the tree: {}", err),
    }
}

fn print_free_lists(store: &BookStore) {
    match store.data_free_slots() {
        Ok(slots) => {
            let slots: Vec<i32> = slots.iter().map(|s| s.as_i32()).collect();
            println!("Data file free slots: {:?}", slots);
        }
        Err(err) => println!("Could not read the data free-list: {}", err),
    }
    match store.index_free_nodes() {
        Ok(nodes) => {
            let nodes: Vec<i32> = nodes.iter().map(|n| n.as_i32()).collect();
            println!("Index file free nodes: {:?}", nodes);
        }
        Err(err) => println!("Could not read the index free-list: {}", err),
    }
}

fn print_totals(store: &BookStore) {
    match store.total_registered() {
        Ok(total) => println!("Registered books: {}", total),
        Err(err) => println!("Could not count the books: {}", err),
    }
    match store.total_stock() {
        Ok(total) => println!("Books in stock: {}", total),
        Err(err) => println!("Could not sum the stock: {}", err),
    }
}

fn import_batch(store: &mut BookStore) {
    let path = read_text("Text file to import: ");
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            println!("Could not open \"{}\": {}", path, err);
            return;
        }
    };

    match store.import_lines(BufReader::new(file)) {
        Ok(summary) => println!(
            "Imported {} book(s); {} duplicate(s), {} malformed line(s).",
            summary.imported, summary.duplicates, summary.malformed
        ),
        Err(err) => println!("Import failed: {}", err),
    }
}

/// Reads one line from stdin, `None` on end of input.
fn read_line(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    io::stdout().flush().ok()?;

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
        Err(_) => None,
    }
}

/// Prompts until a non-negative integer is entered.
fn read_number(prompt: &str) -> i32 {
    loop {
        let Some(line) = read_line(prompt) else {
            return 0;
        };
        match line.trim().parse::<i32>() {
            Ok(value) if value >= 0 => return value,
            _ => println!("Invalid number, try again."),
        }
    }
}

/// Prompts until a positive price is entered; accepts a comma as the
/// decimal separator.
fn read_price(prompt: &str) -> f64 {
    loop {
        let Some(line) = read_line(prompt) else {
            return 0.0;
        };
        match text::parse_price(&line) {
            Some(value) if value > 0.0 => return value,
            _ => println!("Invalid price, try again."),
        }
    }
}

fn read_text(prompt: &str) -> String {
    let line = read_line(prompt).unwrap_or_default();
    text::normalize_whitespace(&line)
}
