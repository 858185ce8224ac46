//! Merchant name cleaning
//!
//! Turns raw statement descriptions ("GGLPAY STARBUCKS 800-782-7282 SEATTLE WA")
//! into display names ("Starbucks"). The function is pure: no configuration, no
//! I/O, and the same input always gives the same output. Passes are repeated
//! until the name stops changing, so cleaning an already clean name is a no-op.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

/// Upper bound on cleaning passes; real descriptions settle in two or three
const MAX_PASSES: usize = 8;

/// Category labels card issuers append to descriptions
const CATEGORY_LABELS: &[&str] = &[
    "TELECOM SERVICE",
    "CABLE & PAY TV",
    "TAXICAB & LIMOUSINE",
    "ONLINE SUBS",
    "MERCHANDISE",
    "PASSENGER TICKET",
    "LODGING",
    "BEAUTY/BARBER SHOP",
    "BEAUTY & BARBER",
    "MEDICAL SERVICE",
    "SPORTS CLOTHING",
    "CONNECTIVITY",
    "INSURANCE",
    "COMPUTER PROGRAMMING",
    "LARGE DIGITAL GOODS M",
    "DUTY-FREE STORE",
    "MISC FOOD STORE",
    "MISC/SPECIALTY RETAIL",
    "RESTAURANT",
    "SHOE STORE",
    "FAMILY CLOTHING",
    "HEALTH & BEAUTY",
    "EDUCATIONAL SERVICE",
    "RECREATION SERVICE",
];

/// Lines that carry only a location
const LOCATION_LINES: &[&str] = &[
    "CA",
    "NY",
    "SG",
    "UK",
    "USA",
    "NA",
    "SAN FRANCISCO",
    "NEW YORK",
    "SANTA MONICA",
    "SINGAPORE",
    "JAKARTA SLT",
];

/// Markers that make a line the preferred merchant candidate
const PRIORITY_MARKERS: &[&str] = &["GGLPAY", "GOOGLE", "UBER", "GRAB", "AMAZON", "NIKE"];

/// Processor prefixes, brand spellings and ride-hailing codes, applied in order
const PROCESSOR_RULES: &[(&str, &str)] = &[
    (r"(?i)^(?:CH|NT)_[A-Z0-9]+\s+\+?\d{10,}\s+", ""),
    (r"(?i)\bNIKE\.COM\b", "Nike"),
    (r"(?i)\bAMERICAN\s+AIRLINES\b", "American Airlines"),
    (r"(?i)\bUNITED\s+AIRLINES\b", "United Airlines"),
    (r"(?i)\bJETBLUE\s+AIRWAYS\b", "JetBlue Airways"),
    (r"(?i)\bAMAZON\.COM\b", "Amazon"),
    (r"(?i)\bAMAZON\s+MARKETPLACE\b", "Amazon"),
    (r"(?i)\bGRAB\s*\*\s*[A-Z0-9-]*", "Grab"),
    (r"(?i)\b[A-Z0-9]{6,}\s+UBER\s+EATS\b", "Uber Eats"),
    (r"(?i)\b[A-Z0-9]{6,}\s+UBER\s+TRIP\b", "Uber Trip"),
    (r"(?i)\bUBER\s+TRIP\b", "Uber Trip"),
    (r"(?i)\bUBER\s+EATS\b", "Uber Eats"),
    (r"(?i)\bUBER\s+", "Uber "),
    (r"(?i)\bGOOGLE\s*\*\s*FI\s+[A-Z0-9]+", "Google Fi"),
    (r"(?i)\bGOOGLE\s*\*\s*", "Google "),
    (r"(?i)\bGGLPAY\s+", ""),
    (r"(?i)\bPAYPAL\s*\*?\s*", "PayPal "),
    (r"(?i)\bSQ\s*\*\s*", "Square "),
    (r"(?i)\bTST\s*\*\s*", ""),
    (r"(?i)\bAMZN\s+", "Amazon "),
    (r"(?i)\bSP\s+", ""),
];

/// Receipt and help URLs that never name the merchant
const URL_PATTERNS: &[&str] = &[
    r"(?i)SQUAREUP\.COM/RECEIPTS",
    r"(?i)G\.CO/HELPPAY#?",
    r"(?i)HELP\.UBER\.COM",
    r"(?i)AMZN\.COM/BILL",
    r"(?i)HULU\.COM/BILL",
];

/// Trailing noise: locations, store ids, company suffixes, phone numbers
const TRAILING_RULES: &[&str] = &[
    r"(?i)\b(?:SAN FRANCISCO|SANTA MONICA|NEW YORK|LOS ANGELES|SEATTLE|PORTLAND|CHICAGO|BOSTON|TORONTO|VANCOUVER|LONDON|PARIS|TOKYO|LONG BEACH)\b",
    r"(?i)\b(?:CA|NY|WA|TX|FL|IL|MA|OR|DC|SG|UK|GB|NA|HK|ID)\s*$",
    r"(?i)(?:FOREIGN SPEND AMOUNT|COMMISSION AMOUNT|CURRENCY EXCHANGE RATE):.*$",
    r"-\d{10,}$",
    r"\s+\d{10,}$",
    r"\s+\d{4}$",
    r"-\d{7,}$",
    r"(?i)\s+(?:SINGAPORE\s+)?PTE\.?\s+LTD\.?",
    r"^\+?\d{10,}\s+",
    r"\s+\+?\d{10,}$",
    r"\s*\(\d{3}\)\s*\d{3}-\d{4}",
    r"\s+\d{3}-\d{3}-\d{4}$",
    r"(?i)\s+HO$",
];

/// Acronyms kept upper case after title-casing
const SPECIAL_CASES: &[(&str, &str)] = &[
    ("Nyc", "NYC"),
    ("Usa", "USA"),
    ("Uk", "UK"),
    ("Mrt", "MRT"),
    ("Ho", "HO"),
];

fn compile_rules(rules: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    rules
        .iter()
        .map(|(pattern, replacement)| {
            (Regex::new(pattern).expect("valid merchant regex"), *replacement)
        })
        .collect()
}

fn compile_strips(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid merchant regex"))
        .collect()
}

fn skip_line_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"^\d{10,}[@A-Z.]+",
            r"^\+\d{10,}",
            r"^(?:CH|NT)_[A-Z0-9]+\s+\+\d{10,}$",
            r"^FOREIGN SPEND AMOUNT:",
            r"^COMMISSION AMOUNT:",
            r"^CURRENCY EXCHANGE RATE:",
            r"^(?:TICKET NUMBER|ADDITIONAL INFO|DESCRIPTION|PRICE)\s*:",
            r"^\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$",
            r"^\d{3,11}$",
            r"^\d{15,}$",
            r"^0{2,}\d{1,5}$",
        ])
        .expect("valid skip-line regexes")
    })
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives: Vec<String> = CATEGORY_LABELS.iter().map(|l| regex::escape(l)).collect();
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .expect("valid label regex")
    })
}

fn code_with_phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]{2,5})\s+[\d\-()]+$").expect("valid regex"))
}

fn numeric_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\d\s\-().]+$").expect("valid regex"))
}

fn special_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s&/-]").expect("valid regex"))
}

fn processor_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| compile_rules(PROCESSOR_RULES))
}

fn url_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| compile_strips(URL_PATTERNS))
}

fn trailing_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| compile_strips(TRAILING_RULES))
}

/// Clean a raw statement description into a merchant display name
pub fn clean_merchant_name(description: &str) -> String {
    let mut current = collapse_whitespace_lines(description);
    for _ in 0..MAX_PASSES {
        let next = clean_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Lowercased lookup key for a merchant name
pub fn merchant_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trim each line and drop blank ones, keeping line structure for candidate selection
fn collapse_whitespace_lines(s: &str) -> String {
    s.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// One full cleaning pass
fn clean_pass(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut cleaned = select_candidate_line(input).to_uppercase();

    cleaned = strip_leading_id(&cleaned);
    cleaned = label_re().replace_all(&cleaned, "").into_owned();

    for (re, replacement) in processor_rules() {
        cleaned = re.replace_all(&cleaned, *replacement).into_owned();
    }
    for re in url_res() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    for re in trailing_res() {
        cleaned = re.replace_all(&cleaned, "").trim_end().to_string();
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let stripped = special_chars_re().replace_all(&collapsed, "");
    let trimmed = stripped.trim_matches(|c: char| matches!(c, '-' | ' ' | '&' | '/'));

    let result = title_case(trimmed);
    if result.is_empty() {
        // Nothing recognizable left; keep the input as a single line
        input.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        result
    }
}

/// Pick the line of a multi-line description most likely to name the merchant
fn select_candidate_line(input: &str) -> &str {
    let mut priority: Vec<&str> = Vec::new();
    let mut candidates: Vec<&str> = Vec::new();

    for line in input.lines() {
        let upper = line.to_uppercase();

        if skip_line_set().is_match(&upper) {
            continue;
        }

        // "<id or number> <category label>" lines carry no merchant
        if let Some((head, rest)) = upper.split_once(' ') {
            let head_is_code = looks_like_id(head, 7) || head.chars().all(|c| c.is_ascii_digit());
            if head_is_code && CATEGORY_LABELS.contains(&rest.trim()) {
                continue;
            }
            if looks_like_id(head, 10) && rest.trim_start().starts_with(|c: char| c.is_ascii_digit())
            {
                continue;
            }
        }

        // "JZD 512-487-1630": the short code is the merchant
        if code_with_phone_re().is_match(&upper) {
            if let Some(code) = line.split_whitespace().next() {
                candidates.push(code);
            }
            continue;
        }

        if CATEGORY_LABELS.contains(&upper.as_str()) || LOCATION_LINES.contains(&upper.as_str()) {
            continue;
        }
        if url_res().iter().any(|re| re.is_match(&upper)) {
            continue;
        }

        if PRIORITY_MARKERS.iter().any(|m| upper.contains(m)) {
            priority.push(line);
        } else {
            candidates.push(line);
        }
    }

    let ordered: Vec<&str> = priority.iter().chain(candidates.iter()).copied().collect();
    match ordered.first().copied() {
        None => input,
        Some(first) if !numeric_only_re().is_match(first) => first,
        Some(_) => ordered
            .iter()
            .copied()
            .find(|c| !numeric_only_re().is_match(c))
            .unwrap_or(input),
    }
}

/// Transaction ids are long alphanumeric tokens containing at least one digit
fn looks_like_id(token: &str, min_len: usize) -> bool {
    token.len() >= min_len
        && token.chars().all(|c| c.is_ascii_alphanumeric())
        && token.chars().any(|c| c.is_ascii_digit())
}

/// Remove a leading transaction id, ISO date or phone number token
fn strip_leading_id(s: &str) -> String {
    let Some((head, rest)) = s.split_once(char::is_whitespace) else {
        return s.to_string();
    };
    let is_date = head.len() == 10
        && head.chars().enumerate().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        });
    let is_phone = head
        .strip_prefix('+')
        .is_some_and(|digits| digits.len() >= 10 && digits.chars().all(|c| c.is_ascii_digit()));

    if looks_like_id(head, 7) || is_date || is_phone {
        rest.trim_start().to_string()
    } else {
        s.to_string()
    }
}

/// Capitalize each word (first letter upper, rest lower), then restore acronyms
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            word.split('/')
                .map(|part| {
                    let capitalized = capitalize(part);
                    SPECIAL_CASES
                        .iter()
                        .find(|(from, _)| *from == capitalized)
                        .map(|(_, to)| to.to_string())
                        .unwrap_or(capitalized)
                })
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "GGLPAY STARBUCKS 800-782-7282 SEATTLE WA",
        "TRADER JOE'S #123 SAN FRANCISCO CA",
        "Trader Joes",
        "SQ *BLUE BOTTLE COFFEE SAN FRANCISCO CA",
        "PAYPAL *STEAM GAMES",
        "AMZN Mktp US*2K4LL1234",
        "UBER   *TRIP HELP.UBER.COM CA",
        "BNJNFFMM UBER EATS\nHELP.UBER.COM\nCA",
        "GRAB*A-8PXHISMWWU9TAV SINGAPORE SG",
        "GOOGLE *YouTube Premium g.co/helppay#",
        "RXBZZ6DJHJM CABLE & PAY TV\nCOMCAST CALIFORNIA\n800-266-2278",
        "4158005959\nLEFT DOOR COFFEE",
        "FOO BAR NY CA",
        "MRT BUS/MRT SINGAPORE",
        "CH_2SFYNP7Q +18556687574 ACME TOOLS",
        "MEXICOLA HO",
        "12345",
        "",
        "***",
    ];

    #[test]
    fn test_processor_prefixes_stripped() {
        assert_eq!(clean_merchant_name("GGLPAY STARBUCKS 800-782-7282 SEATTLE WA"), "Starbucks");
        assert_eq!(clean_merchant_name("SQ *BLUE BOTTLE COFFEE SAN FRANCISCO CA"), "Square Blue Bottle Coffee");
        assert_eq!(clean_merchant_name("PAYPAL *STEAM GAMES"), "Paypal Steam Games");
    }

    #[test]
    fn test_location_and_store_codes() {
        assert_eq!(clean_merchant_name("TRADER JOE'S #123 SAN FRANCISCO CA"), "Trader Joes 123");
        assert_eq!(clean_merchant_name("SAFEWAY 0215"), "Safeway");
        assert_eq!(clean_merchant_name("Trader Joes"), "Trader Joes");
    }

    #[test]
    fn test_uber_and_grab() {
        assert_eq!(clean_merchant_name("BNJNFFMM UBER EATS\nHELP.UBER.COM\nCA"), "Uber Eats");
        assert_eq!(clean_merchant_name("GRAB*A-8PXHISMWWU9TAV SINGAPORE SG"), "Grab Singapore");
    }

    #[test]
    fn test_multiline_picks_merchant_line() {
        assert_eq!(
            clean_merchant_name("RXBZZ6DJHJM CABLE & PAY TV\nCOMCAST CALIFORNIA\n800-266-2278"),
            "Comcast California"
        );
        assert_eq!(clean_merchant_name("4158005959\nLEFT DOOR COFFEE"), "Left Door Coffee");
    }

    #[test]
    fn test_stripe_charge_prefix() {
        assert_eq!(clean_merchant_name("CH_2SFYNP7Q +18556687574 ACME TOOLS"), "Acme Tools");
    }

    #[test]
    fn test_acronyms_kept() {
        assert_eq!(clean_merchant_name("MRT BUS/MRT"), "MRT Bus/MRT");
    }

    #[test]
    fn test_fallback_keeps_input() {
        assert_eq!(clean_merchant_name(""), "");
        assert_eq!(clean_merchant_name("***"), "***");
        assert_eq!(clean_merchant_name("12345"), "12345");
    }

    #[test]
    fn test_cleaning_is_deterministic() {
        for sample in SAMPLES {
            assert_eq!(clean_merchant_name(sample), clean_merchant_name(sample), "{sample}");
        }
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        for sample in SAMPLES {
            let once = clean_merchant_name(sample);
            let twice = clean_merchant_name(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_merchant_key() {
        assert_eq!(merchant_key("  Uber Eats "), "uber eats");
    }
}
