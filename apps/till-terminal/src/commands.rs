//! # Console Commands
//!
//! One line of operator input maps to one [`Command`].
//!
//! | Command                                   | Session call             |
//! |-------------------------------------------|--------------------------|
//! | `add <id> <qty> <price_cents> <avail> <name>` | `add_item`           |
//! | `qty <id> <qty>`                          | `update_quantity`        |
//! | `remove <id>`                             | `remove_item`            |
//! | `clear`                                   | `clear_cart`             |
//! | `cart`                                    | `cart` / `summary`       |
//! | `check`                                   | `validate_cart_stock`    |
//! | `checkout` / `next` / `back` / `cancel`   | checkout steps           |
//! | `details [customer] [-- note]`            | `set_details`            |
//! | `pay [customer] [-- note]`                | `process_sale`           |
//! | `sync`                                    | `force_sync`             |
//! | `status` / `offline`                      | sync status, records     |
//! | `retry <sale>` / `purge <sale>`           | operator intervention    |
//! | `notes` / `dismiss <id>`                  | notifications            |
//! | `help` / `quit`                           |                          |

use anyhow::{anyhow, bail, Context, Result};

use till_core::CartLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(CartLine),
    Quantity { product_id: String, quantity: i64 },
    Remove(String),
    Clear,
    Cart,
    Check,
    Checkout,
    Next,
    Back,
    Cancel,
    Details {
        customer_id: Option<String>,
        note: Option<String>,
    },
    Pay {
        customer_id: Option<String>,
        note: Option<String>,
    },
    Sync,
    Status,
    Offline,
    Retry(String),
    Purge(String),
    Notes,
    Dismiss(u64),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  add <id> <qty> <price_cents> <available> <name...>
  qty <id> <qty>        remove <id>        clear        cart
  check                 checkout | next | back | cancel
  details [customer] [-- note]
  pay [customer] [-- note]
  sync | status | offline | retry <sale> | purge <sale>
  notes | dismiss <id> | help | quit";

impl Command {
    /// Parses one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let (head, note) = match line.split_once("--") {
            Some((head, note)) => (head, Some(note.trim().to_string())),
            None => (line, None),
        };

        let mut words = head.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match verb {
            "add" => {
                if args.len() < 5 {
                    bail!("usage: add <id> <qty> <price_cents> <available> <name...>");
                }
                Command::Add(CartLine::new(
                    args[0],
                    args[4..].join(" "),
                    number(args[1], "qty")?,
                    number(args[2], "price_cents")?,
                    number(args[3], "available")?,
                ))
            }
            "qty" => Command::Quantity {
                product_id: arg(&args, 0, "product id")?.to_string(),
                quantity: number(arg(&args, 1, "quantity")?, "quantity")?,
            },
            "remove" => Command::Remove(arg(&args, 0, "product id")?.to_string()),
            "clear" => Command::Clear,
            "cart" => Command::Cart,
            "check" => Command::Check,
            "checkout" => Command::Checkout,
            "next" => Command::Next,
            "back" => Command::Back,
            "cancel" => Command::Cancel,
            "details" => Command::Details {
                customer_id: args.first().map(|c| c.to_string()),
                note,
            },
            "pay" => Command::Pay {
                customer_id: args.first().map(|c| c.to_string()),
                note,
            },
            "sync" => Command::Sync,
            "status" => Command::Status,
            "offline" => Command::Offline,
            "retry" => Command::Retry(arg(&args, 0, "sale id")?.to_string()),
            "purge" => Command::Purge(arg(&args, 0, "sale id")?.to_string()),
            "notes" => Command::Notes,
            "dismiss" => Command::Dismiss(number(arg(&args, 0, "notification id")?, "id")?),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{other}', try 'help'"),
        };

        Ok(Some(command))
    }
}

fn arg<'a>(args: &[&'a str], index: usize, what: &str) -> Result<&'a str> {
    args.get(index).copied().ok_or_else(|| anyhow!("missing {what}"))
}

fn number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{what} must be a number, got '{value}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_keeps_multi_word_name() {
        let command = Command::parse("add a 3 250 5 Flat White").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Add(CartLine::new("a", "Flat White", 3, 250, 5))
        );
    }

    #[test]
    fn test_parse_pay_with_note() {
        let command = Command::parse("pay c-1 -- table 4, no ice").unwrap().unwrap();
        assert_eq!(
            command,
            Command::Pay {
                customer_id: Some("c-1".into()),
                note: Some("table 4, no ice".into()),
            }
        );

        let bare = Command::parse("pay").unwrap().unwrap();
        assert_eq!(
            bare,
            Command::Pay {
                customer_id: None,
                note: None
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("add a 3").is_err());
        assert!(Command::parse("qty a many").is_err());
        assert!(Command::parse("dismiss").is_err());
        assert!(Command::parse("refund").is_err());
        assert_eq!(Command::parse("   ").unwrap(), None);
    }
}
