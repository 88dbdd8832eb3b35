//! Deterministic completion from built-in templates.
//!
//! The text before the cursor is tokenised to work out whether the cursor is
//! at the top level, in a contract body or in a function body. Templates for
//! that scope are offered, together with the fields and events of the
//! enclosing contract, filtered by the word being typed and ranked by how
//! likely they are to be wanted there.

use chumsky::Parser as _;

use crate::{
    complete::{CompletionProvider, FileContext, Suggestion},
    syntax::{
        ast::Contract,
        lexer::lexer,
        parse_recovering,
        token::{Keyword, Punct, Token},
    },
};

/// Where the cursor is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    TopLevel,
    Contract,
    Function,
}

/// A built-in completion.
struct Template {
    scope:   Scope,
    title:   &'static str,
    snippet: &'static str,
    score:   f64,
}

const TEMPLATES: &[Template] = &[
    Template {
        scope:   Scope::TopLevel,
        title:   "contract",
        snippet: "contract Name {\n  owner: address\n\n  init() {\n    self.owner = msg.sender\n  }\n}",
        score:   0.9,
    },
    Template {
        scope:   Scope::Contract,
        title:   "function",
        snippet: "name() {\n  \n}",
        score:   0.8,
    },
    Template {
        scope:   Scope::Contract,
        title:   "init handler",
        snippet: "init() {\n  self.owner = msg.sender\n}",
        score:   0.7,
    },
    Template {
        scope:   Scope::Contract,
        title:   "field",
        snippet: "name: u64",
        score:   0.6,
    },
    Template {
        scope:   Scope::Contract,
        title:   "nonReentrant function",
        snippet: "@nonReentrant\nwithdraw(amount: u64) {\n  \n}",
        score:   0.55,
    },
    Template {
        scope:   Scope::Contract,
        title:   "event",
        snippet: "event Name(who: address, amount: u64)",
        score:   0.5,
    },
    Template {
        scope:   Scope::Contract,
        title:   "private function",
        snippet: "private name() -> u64 {\n  return 0\n}",
        score:   0.4,
    },
    Template {
        scope:   Scope::Function,
        title:   "require",
        snippet: "require(condition, \"message\")",
        score:   0.7,
    },
    Template {
        scope:   Scope::Function,
        title:   "let",
        snippet: "let name = value",
        score:   0.6,
    },
    Template {
        scope:   Scope::Function,
        title:   "if",
        snippet: "if condition {\n  \n}",
        score:   0.6,
    },
    Template {
        scope:   Scope::Function,
        title:   "return",
        snippet: "return value",
        score:   0.5,
    },
    Template {
        scope:   Scope::Function,
        title:   "while",
        snippet: "while condition {\n  \n}",
        score:   0.4,
    },
    Template {
        scope:   Scope::Function,
        title:   "transfer",
        snippet: "transfer(to, amount)",
        score:   0.4,
    },
    Template {
        scope:   Scope::Function,
        title:   "revert",
        snippet: "revert(\"reason\")",
        score:   0.3,
    },
];

/// The bonus for a suggestion whose title starts with the word being typed.
const PREFIX_BONUS: f64 = 0.2;

/// Completes from built-in templates and the declarations in the file.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalCompletion;

impl LocalCompletion {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CompletionProvider for LocalCompletion {
    fn complete(&self, context: &FileContext) -> Vec<Suggestion> {
        let before = context.before_cursor();
        let scope = scope(before);
        let word = before
            .rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
            .next()
            .unwrap_or_default();
        let after_self = before[..before.len() - word.len()].ends_with("self.");

        let ast = parse_recovering(&context.content).ast;
        let cursor = before.chars().count();
        let contract = ast
            .contracts
            .iter()
            .filter(|c| c.span.start <= cursor)
            .last();

        let mut candidates = Vec::new();
        if !after_self {
            candidates.extend(
                TEMPLATES
                    .iter()
                    .filter(|t| t.scope == scope)
                    .filter(|t| !(t.title == "init handler" && contract.is_some_and(|c| !c.inits.is_empty())))
                    .map(|t| Suggestion::new(t.title, t.snippet, t.score)),
            );
        }
        if scope == Scope::Function {
            if let Some(contract) = contract {
                candidates.extend(declarations(contract, after_self));
            }
        }

        let mut suggestions = candidates
            .into_iter()
            .filter_map(|s| rank(s, word))
            .collect::<Vec<_>>();
        suggestions.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.title.cmp(&b.title)));
        suggestions
    }
}

/// Works out the scope at the end of `before` from its braces.
fn scope(before: &str) -> Scope {
    let (tokens, _) = lexer().parse_recovery(before);
    let mut frames = Vec::new();
    let mut opens_contract = false;
    for (token, _) in tokens.unwrap_or_default() {
        match token {
            Token::Keyword(Keyword::Contract) => opens_contract = true,
            Token::Punct(Punct::LBrace) => {
                frames.push(if opens_contract { Scope::Contract } else { Scope::Function });
                opens_contract = false;
            }
            Token::Punct(Punct::RBrace) => {
                frames.pop();
            }
            _ => {}
        }
    }
    if frames.contains(&Scope::Function) {
        Scope::Function
    } else if frames.is_empty() {
        Scope::TopLevel
    } else {
        Scope::Contract
    }
}

/// Suggestions for the fields and events of `contract`. Directly after
/// `self.` only the field names themselves are offered.
fn declarations(contract: &Contract, after_self: bool) -> Vec<Suggestion> {
    let fields = contract.fields.iter().map(|field| {
        let name = &field.name.name;
        if after_self {
            Suggestion::new(name.clone(), name.clone(), 0.9)
        } else {
            Suggestion::new(format!("self.{name}"), format!("self.{name}"), 0.45)
        }
    });
    let owner_check = contract
        .fields
        .iter()
        .find(|field| field.name.name == "owner")
        .filter(|_| !after_self)
        .map(|_| {
            Suggestion::new(
                "require owner",
                "require(msg.sender == self.owner, \"Unauthorized\")",
                0.75,
            )
        });
    let events = contract.events.iter().filter(|_| !after_self).map(|event| {
        let params = event
            .params
            .iter()
            .map(|p| p.name.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Suggestion::new(
            format!("emit {}", event.name.name),
            format!("emit {}({params})", event.name.name),
            0.5,
        )
    });
    fields.chain(owner_check).chain(events).collect()
}

/// Filters `suggestion` by the `word` being typed, boosting it if a word of
/// its title starts with `word`.
fn rank(suggestion: Suggestion, word: &str) -> Option<Suggestion> {
    if word.is_empty() {
        return Some(suggestion);
    }
    let matches = suggestion
        .title
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|part| part.starts_with(word));
    matches.then(|| {
        let score = suggestion.score + PREFIX_BONUS;
        Suggestion::new(suggestion.title, suggestion.snippet, score)
    })
}

#[cfg(test)]
mod test {
    use aurion_errors::location::Location;

    use crate::complete::{local::LocalCompletion, CompletionProvider, FileContext};

    const SOURCE: &str = "contract Vault {
  owner: address
  balance: u64

  event Paid(to: address, amount: u64)

  init() {
    self.owner = msg.sender
  }

  pay(to: address) {

  }
}
";

    fn titles(line: usize, column: usize) -> Vec<String> {
        let context = FileContext::new("vault.aur", SOURCE).with_cursor(Location::new(line, column));
        LocalCompletion::new()
            .complete(&context)
            .into_iter()
            .map(|s| s.title)
            .collect()
    }

    #[test]
    fn offers_contract_templates_at_the_top_level() {
        let context = FileContext::new("new.aur", "");
        let suggestions = LocalCompletion::new().complete(&context);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].title, "contract");
    }

    #[test]
    fn offers_members_in_a_contract_body() {
        let titles = titles(2, 1);
        assert_eq!(titles[0], "function");
        assert!(titles.contains(&"event".to_string()));
        assert!(!titles.contains(&"init handler".to_string()));
        assert!(!titles.contains(&"require".to_string()));
    }

    #[test]
    fn offers_statements_and_declarations_in_a_function_body() {
        let titles = titles(12, 5);
        assert_eq!(titles[0], "require owner");
        assert!(titles.contains(&"emit Paid".to_string()));
        assert!(titles.contains(&"self.balance".to_string()));
        assert!(!titles.contains(&"function".to_string()));
    }

    #[test]
    fn ranking_is_deterministic() {
        assert_eq!(titles(12, 5), titles(12, 5));
    }

    #[test]
    fn completes_field_names_after_self() {
        let source = "contract A {\n  balance: u64\n  bonus: u64\n  f() {\n    self.ba\n  }\n}";
        let context = FileContext::new("a.aur", source).with_cursor(Location::new(5, 12));
        let suggestions = LocalCompletion::new().complete(&context);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].snippet, "balance");
        assert_eq!(suggestions[0].score, 1.0);
    }
}
