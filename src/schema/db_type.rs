use std::fmt;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1, none_of},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded},
};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

/// Backend a type declaration or SQL rendering targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    Default,
    MySql,
    MariaDb,
    Sqlite,
}

impl DatabaseType {
    /// Concrete backends, in the order foreign declarations are tried during resolution
    pub const BACKENDS: [DatabaseType; 3] = [DatabaseType::MariaDb, DatabaseType::MySql, DatabaseType::Sqlite];

    pub fn is_mysql_family(&self) -> bool {
        matches!(self, DatabaseType::MySql | DatabaseType::MariaDb)
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DatabaseType::Default => "Default",
            DatabaseType::MySql => "MySQL",
            DatabaseType::MariaDb => "MariaDB",
            DatabaseType::Sqlite => "SQLite",
        };
        f.write_str(name)
    }
}

/// A column type as declared (or resolved) for one backend, e.g. `decimal(10,2) unsigned`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseColumnType {
    pub database: DatabaseType,
    /// Lower-case type name without arguments
    pub name: String,
    pub length: Option<u64>,
    pub decimals: Option<u32>,
    /// `Some(false)` for `unsigned`
    pub signed: Option<bool>,
    /// Values of an `enum(...)` declaration
    pub enum_values: Vec<String>,
}

impl DatabaseColumnType {
    pub fn new(database: DatabaseType, name: &str) -> Self {
        DatabaseColumnType {
            database,
            name: name.to_ascii_lowercase(),
            length: None,
            decimals: None,
            signed: None,
            enum_values: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = Some(false);
        self
    }

    pub fn for_database(&self, database: DatabaseType) -> Self {
        DatabaseColumnType {
            database,
            ..self.clone()
        }
    }

    /// Parse a declaration such as `varchar(50)`, `decimal(10, 2) unsigned` or `enum('a','b')`
    pub fn parse(database: DatabaseType, input: &str) -> Result<Self> {
        match all_consuming(delimited(multispace0, type_decl, multispace0)).parse(input) {
            Ok((_, decl)) => {
                let mut ty = DatabaseColumnType::new(database, decl.name);
                match decl.args {
                    Some(TypeArgs::Numeric(nums)) => {
                        ty.length = nums.first().copied();
                        ty.decimals = nums.get(1).map(|d| *d as u32);
                    }
                    Some(TypeArgs::Values(values)) => ty.enum_values = values,
                    None => {}
                }
                if decl.unsigned {
                    ty.signed = Some(false);
                }
                Ok(ty)
            }
            Err(e) => Err(Error::new(
                ErrorKind::Parse,
                format!("invalid column type '{}': {}", input, e),
            )),
        }
    }
}

impl fmt::Display for DatabaseColumnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.enum_values.is_empty() {
            let quoted: Vec<String> = self.enum_values.iter().map(|v| format!("'{}'", v.replace('\'', "''"))).collect();
            write!(f, "({})", quoted.join(","))?;
        } else if let Some(length) = self.length {
            match self.decimals {
                Some(d) => write!(f, "({},{})", length, d)?,
                None => write!(f, "({})", length)?,
            }
        }
        if self.signed == Some(false) {
            f.write_str(" unsigned")?;
        }
        Ok(())
    }
}

struct TypeDecl<'a> {
    name: &'a str,
    args: Option<TypeArgs>,
    unsigned: bool,
}

enum TypeArgs {
    Numeric(Vec<u64>),
    Values(Vec<String>),
}

fn type_decl(input: &str) -> IResult<&str, TypeDecl<'_>> {
    let (input, name) = type_name(input)?;
    let (input, args) = opt(preceded(multispace0, type_args)).parse(input)?;
    let (input, unsigned) = opt(preceded(multispace1, tag_no_case("unsigned"))).parse(input)?;
    Ok((input, TypeDecl { name, args, unsigned: unsigned.is_some() }))
}

fn type_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn type_args(input: &str) -> IResult<&str, TypeArgs> {
    delimited(
        char('('),
        alt((
            map(separated_list1(list_sep, number), TypeArgs::Numeric),
            map(separated_list1(list_sep, quoted), TypeArgs::Values),
        )),
        preceded(multispace0, char(')')),
    )
    .parse(input)
}

fn list_sep(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(','), multispace0).parse(input)
}

fn number(input: &str) -> IResult<&str, u64> {
    preceded(multispace0, map_res(digit1, |s: &str| s.parse::<u64>())).parse(input)
}

/// Single-quoted literal with `''` as the escaped quote
fn quoted(input: &str) -> IResult<&str, String> {
    let (input, body) = preceded(
        multispace0,
        delimited(
            char('\''),
            recognize(many0(alt((tag("''"), recognize(none_of("'")))))),
            char('\''),
        ),
    )
    .parse(input)?;
    Ok((input, body.replace("''", "'")))
}
