use http::{header, HeaderMap, HeaderValue};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Encoding {
    Gzip,
    Brotli,
    Identity,
}

impl Encoding {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Brotli => "br",
            Encoding::Identity => "identity",
        }
    }

    pub(crate) fn into_header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }

    fn matches(self, coding: &str) -> bool {
        match self {
            // `x-gzip` is an alias kept around by older clients
            Encoding::Gzip => {
                coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip")
            }
            Encoding::Brotli => coding.eq_ignore_ascii_case("br"),
            Encoding::Identity => coding.eq_ignore_ascii_case("identity"),
        }
    }
}

/// Quality value in thousandths, `q=0.5` is `QValue(500)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QValue(u16);

impl QValue {
    #[inline]
    fn one() -> Self {
        Self(1000)
    }

    #[inline]
    fn is_zero(self) -> bool {
        self.0 == 0
    }

    // Parse a q-value as specified in RFC 7231 section 5.3.1.
    fn parse(s: &str) -> Option<Self> {
        let mut c = s.chars();
        // Parse "q=" (case-insensitively).
        match c.next() {
            Some('q' | 'Q') => (),
            _ => return None,
        };
        match c.next() {
            Some('=') => (),
            _ => return None,
        };

        // Parse leading digit. Since valid q-values are between 0.000 and 1.000, only "0" and "1"
        // are allowed.
        let mut value = match c.next() {
            Some('0') => 0,
            Some('1') => 1000,
            _ => return None,
        };

        // Parse optional decimal point.
        match c.next() {
            Some('.') => (),
            None => return Some(Self(value)),
            _ => return None,
        };

        // Parse optional fractional digits. The value of each digit is multiplied by `factor`.
        // Since the q-value is represented as an integer between 0 and 1000, `factor` is `100` for
        // the first digit, `10` for the next, and `1` for the digit after that.
        let mut factor = 100;
        loop {
            match c.next() {
                Some(n @ '0'..='9') => {
                    // If `factor` is less than `1`, three digits have already been parsed. A
                    // q-value having more than 3 fractional digits is invalid.
                    if factor < 1 {
                        return None;
                    }
                    // Add the digit's value multiplied by `factor` to `value`.
                    value += factor * (n as u16 - '0' as u16);
                }
                None => {
                    // No more characters to parse. Check that the value representing the q-value is
                    // in the valid range.
                    return if value <= 1000 {
                        Some(Self(value))
                    } else {
                        None
                    };
                }
                _ => return None,
            };
            factor /= 10;
        }
    }
}

/// The codings a client listed in `Accept-Encoding`, with their weights.
#[derive(Clone, Debug, Default)]
pub(crate) struct AcceptEncoding {
    codings: Vec<(String, QValue)>,
}

impl AcceptEncoding {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let codings = headers
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|hval| hval.to_str().ok())
            .flat_map(|s| s.split(','))
            .filter_map(|v| {
                let mut v = v.splitn(2, ';');
                let coding = v.next()?.trim();
                if coding.is_empty() {
                    return None;
                }

                let qval = if let Some(qval) = v.next() {
                    QValue::parse(qval.trim())?
                } else {
                    QValue::one()
                };

                Some((coding.to_owned(), qval))
            })
            .collect();

        Self { codings }
    }

    /// Whether the client is willing to receive `encoding`.
    ///
    /// An explicit entry wins over `*`; a missing header only admits identity.
    pub(crate) fn accepts(&self, encoding: Encoding) -> bool {
        if let Some((_, qval)) = self
            .codings
            .iter()
            .find(|(coding, _)| encoding.matches(coding))
        {
            return !qval.is_zero();
        }

        if let Some((_, qval)) = self.codings.iter().find(|(coding, _)| coding == "*") {
            return !qval.is_zero();
        }

        encoding == Encoding::Identity
    }
}
