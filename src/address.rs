//! Parsing of record-link address strings.
//!
//! A record's link field names the provider, the process variable, an
//! optional element type, and an optional option list:
//!
//! ```text
//! address   := name WS pv (WS valueType)? (WS '(' option (',' option)* ')')?
//! name      := [A-Za-z0-9_]+
//! pv        := any non-whitespace
//! valueType := bool | int8 | uint8 | int16 | uint16 | int32 | uint32
//!            | int64 | uint64 | float | double | string | void
//! option    := 'nobidirectional'
//! ```
//!
//! Examples: `app1 /some/pv double`, `plc /valves/v7 (nobidirectional)`.
//! Unknown options fail the parse. Errors carry the byte index of the
//! offending character.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::space1,
    combinator::{cut, eof, opt, value},
    multi::separated_list1,
    sequence::{delimited, preceded},
};

use crate::error::Error;
use crate::value::{ElementType, canonical_pv_name};

/// A parsed record-link address.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordAddress {
    /// Application or device id naming the provider.
    pub provider_name: String,
    /// Canonicalised process-variable name.
    pub pv_name: String,
    /// Requested element type; `None` means use the provider's default.
    pub value_type: Option<ElementType>,
    /// False when the `nobidirectional` option is present.
    pub bidirectional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AddressOption {
    NoBidirectional,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_pv_char(c: char) -> bool {
    c != ' ' && c != '\t'
}

fn element_type_keyword(input: &str) -> IResult<&str, ElementType> {
    alt((
        value(ElementType::Bool, tag("bool")),
        value(ElementType::Int8, tag("int8")),
        value(ElementType::UInt8, tag("uint8")),
        value(ElementType::Int16, tag("int16")),
        value(ElementType::UInt16, tag("uint16")),
        value(ElementType::Int32, tag("int32")),
        value(ElementType::UInt32, tag("uint32")),
        value(ElementType::Int64, tag("int64")),
        value(ElementType::UInt64, tag("uint64")),
        value(ElementType::Float32, tag("float")),
        value(ElementType::Float64, tag("double")),
        value(ElementType::String, tag("string")),
        value(ElementType::Void, tag("void")),
    ))
    .parse(input)
}

fn option(input: &str) -> IResult<&str, AddressOption> {
    value(AddressOption::NoBidirectional, tag("nobidirectional")).parse(input)
}

// Once the opening parenthesis has been seen, a malformed option list must
// not backtrack into "no options": the error has to point at the bad option.
fn option_list(input: &str) -> IResult<&str, Vec<AddressOption>> {
    delimited(
        tag("("),
        cut(separated_list1(tag(","), option)),
        cut(tag(")")),
    )
    .parse(input)
}

fn address(input: &str) -> IResult<&str, RecordAddress> {
    let (rest, (provider_name, _, pv, value_type, options, _)) = (
        take_while1(is_name_char),
        space1,
        take_while1(is_pv_char),
        opt(preceded(space1, element_type_keyword)),
        opt(preceded(space1, option_list)),
        eof,
    )
        .parse(input)?;
    let options = options.unwrap_or_default();
    Ok((
        rest,
        RecordAddress {
            provider_name: provider_name.to_string(),
            pv_name: canonical_pv_name(pv),
            value_type,
            bidirectional: !options.contains(&AddressOption::NoBidirectional),
        },
    ))
}

fn excerpt(input: &str) -> &str {
    let end = input
        .char_indices()
        .take(5)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &input[..end]
}

impl RecordAddress {
    /// Parses an address string, pointing at the offending character on
    /// failure.
    pub fn parse(input: &str) -> Result<RecordAddress, Error> {
        match address(input) {
            Ok((_, parsed)) => Ok(parsed),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let at = input.len() - e.input.len();
                let message = if e.input.is_empty() {
                    "unexpected end of string".to_string()
                } else {
                    format!("unexpected \"{}\"", excerpt(e.input))
                };
                Err(Error::AddressParse { at, message })
            }
            Err(nom::Err::Incomplete(_)) => Err(Error::AddressParse {
                at: input.len(),
                message: "incomplete address".to_string(),
            }),
        }
    }
}

impl std::str::FromStr for RecordAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordAddress::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_address_parses() {
        let parsed = RecordAddress::parse("app1 /some/pv double").unwrap();
        assert_eq!(
            parsed,
            RecordAddress {
                provider_name: "app1".into(),
                pv_name: "/some/pv".into(),
                value_type: Some(ElementType::Float64),
                bidirectional: true,
            }
        );
    }

    #[test]
    fn the_value_type_is_optional() {
        let parsed = RecordAddress::parse("dev_2 registers/adc0").unwrap();
        assert_eq!(parsed.provider_name, "dev_2");
        assert_eq!(parsed.pv_name, "/registers/adc0");
        assert_eq!(parsed.value_type, None);
    }

    #[test]
    fn separators_collapse_and_pv_names_canonicalise() {
        let parsed = RecordAddress::parse("app \t //a///b/  uint16").unwrap();
        assert_eq!(parsed.pv_name, "/a/b");
        assert_eq!(parsed.value_type, Some(ElementType::UInt16));
    }

    #[test]
    fn every_type_keyword_is_recognised() {
        for ty in ElementType::ALL {
            let input = format!("app /pv {}", ty.keyword());
            let parsed = RecordAddress::parse(&input).unwrap();
            assert_eq!(parsed.value_type, Some(*ty), "keyword {}", ty.keyword());
        }
    }

    #[test]
    fn options_parse_with_and_without_a_type() {
        let parsed = RecordAddress::parse("app /pv int32 (nobidirectional)").unwrap();
        assert_eq!(parsed.value_type, Some(ElementType::Int32));
        assert!(!parsed.bidirectional);

        let parsed = RecordAddress::parse("app /pv (nobidirectional)").unwrap();
        assert_eq!(parsed.value_type, None);
        assert!(!parsed.bidirectional);
    }

    #[test]
    fn unknown_options_fail_at_their_position() {
        let Err(Error::AddressParse { at, .. }) = RecordAddress::parse("app /pv (wibble)") else {
            panic!("the parse must fail");
        };
        assert_eq!(at, 9);
    }

    #[test]
    fn a_missing_pv_fails_at_the_end() {
        let Err(Error::AddressParse { at, .. }) = RecordAddress::parse("app") else {
            panic!("the parse must fail");
        };
        assert_eq!(at, 3);
    }

    #[test]
    fn trailing_garbage_fails() {
        assert!(matches!(
            RecordAddress::parse("app /pv int32 tail"),
            Err(Error::AddressParse { .. })
        ));
        assert!(matches!(
            RecordAddress::parse("app /pv int12"),
            Err(Error::AddressParse { .. })
        ));
    }
}
