//! Parser for the header of a NumPy `.npy` file.
//!
//! The header is a Python dictionary literal such as
//! `{'descr': [('uid', '<u8'), ('blob/shape', '<u4', (2,))], 'fortran_order': False, 'shape': (12,), }`.
//! Only the literal forms NumPy actually writes are understood: strings, integers,
//! booleans, None, tuples, lists and dictionaries.
use super::error::CsFileError;

#[derive(Debug, Clone, PartialEq)]
pub enum PyLiteral {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    Tuple(Vec<PyLiteral>),
    List(Vec<PyLiteral>),
    Dict(Vec<(PyLiteral, PyLiteral)>),
}

impl PyLiteral {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Items of a tuple or list
    pub fn as_sequence(&self) -> Option<&[PyLiteral]> {
        match self {
            Self::Tuple(items) | Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a string key in a dictionary
    pub fn get(&self, key: &str) -> Option<&PyLiteral> {
        match self {
            Self::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// The fields of the header dictionary that describe the array layout
#[derive(Debug, Clone, PartialEq)]
pub struct NpyHeader {
    pub descr: PyLiteral,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl NpyHeader {
    pub fn parse(text: &str) -> Result<Self, CsFileError> {
        let mut parser = Parser::new(text);
        let dict = parser.parse_value()?;
        let descr = dict
            .get("descr")
            .cloned()
            .ok_or_else(|| bad("header has no descr"))?;
        let fortran_order = match dict.get("fortran_order") {
            Some(PyLiteral::Bool(b)) => *b,
            _ => return Err(bad("header has no fortran_order")),
        };
        let shape = dict
            .get("shape")
            .and_then(PyLiteral::as_sequence)
            .ok_or_else(|| bad("header has no shape"))?
            .iter()
            .map(|dim| {
                dim.as_int()
                    .and_then(|d| usize::try_from(d).ok())
                    .ok_or_else(|| bad("shape entries must be non-negative integers"))
            })
            .collect::<Result<Vec<usize>, CsFileError>>()?;
        Ok(Self {
            descr,
            fortran_order,
            shape,
        })
    }
}

fn bad(msg: &str) -> CsFileError {
    CsFileError::BadHeader(msg.to_string())
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, expected: char) -> Result<(), CsFileError> {
        self.skip_whitespace();
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(CsFileError::BadHeader(format!(
                "expected '{expected}' but found '{c}'"
            ))),
            None => Err(bad("unexpected end of header")),
        }
    }

    fn parse_value(&mut self) -> Result<PyLiteral, CsFileError> {
        self.skip_whitespace();
        match self.chars.peek() {
            Some('\'') | Some('"') => self.parse_string(),
            Some('(') => {
                self.chars.next();
                Ok(PyLiteral::Tuple(self.parse_items(')')?))
            }
            Some('[') => {
                self.chars.next();
                Ok(PyLiteral::List(self.parse_items(']')?))
            }
            Some('{') => {
                self.chars.next();
                self.parse_dict()
            }
            Some(c) if c.is_ascii_digit() || *c == '-' => self.parse_int(),
            Some(c) if c.is_ascii_alphabetic() => self.parse_word(),
            Some(c) => Err(CsFileError::BadHeader(format!("unexpected character '{c}'"))),
            None => Err(bad("unexpected end of header")),
        }
    }

    fn parse_string(&mut self) -> Result<PyLiteral, CsFileError> {
        let quote = self.chars.next().ok_or_else(|| bad("missing quote"))?;
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some('\\') => match self.chars.next() {
                    Some(c) => value.push(c),
                    None => return Err(bad("unterminated string")),
                },
                Some(c) if c == quote => return Ok(PyLiteral::Str(value)),
                Some(c) => value.push(c),
                None => return Err(bad("unterminated string")),
            }
        }
    }

    fn parse_int(&mut self) -> Result<PyLiteral, CsFileError> {
        let mut digits = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '-') {
            digits.push(c);
        }
        // Python 2 era headers may carry a long suffix
        self.chars.next_if(|c| *c == 'L');
        digits
            .parse::<i64>()
            .map(PyLiteral::Int)
            .map_err(|_| CsFileError::BadHeader(format!("bad integer {digits}")))
    }

    fn parse_word(&mut self) -> Result<PyLiteral, CsFileError> {
        let mut word = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_alphanumeric()) {
            word.push(c);
        }
        match word.as_str() {
            "True" => Ok(PyLiteral::Bool(true)),
            "False" => Ok(PyLiteral::Bool(false)),
            "None" => Ok(PyLiteral::None),
            _ => Err(CsFileError::BadHeader(format!("unknown literal {word}"))),
        }
    }

    /// Comma separated values up to the closing delimiter; trailing commas are allowed
    fn parse_items(&mut self, close: char) -> Result<Vec<PyLiteral>, CsFileError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.chars.next_if_eq(&close).is_some() {
                return Ok(items);
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            if self.chars.next_if_eq(&',').is_none() {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn parse_dict(&mut self) -> Result<PyLiteral, CsFileError> {
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.chars.next_if_eq(&'}').is_some() {
                return Ok(PyLiteral::Dict(entries));
            }
            let key = self.parse_value()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            self.skip_whitespace();
            if self.chars.next_if_eq(&',').is_none() {
                self.expect('}')?;
                return Ok(PyLiteral::Dict(entries));
            }
        }
    }
}
