use std::collections::HashMap;
use std::fmt;
use winnow::ascii::{line_ending, multispace0, space0, till_line_ending};
use winnow::combinator::{alt, delimited, repeat, separated};
use winnow::error::ContextError;
use winnow::token::take_while;
use winnow::Parser;

/// Widest wire pattern a [`LookupTable`] can be indexed with.
pub const MAX_WIDTH: u32 = 16;

/// Left/right classification of a wire pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LrClass {
    /// The pattern is not a track segment.
    #[default]
    None = 0,
    /// The track passed to the right of the priority wire.
    Right = 1,
    /// The track passed to the left of the priority wire.
    Left = 2,
    /// A track segment whose drift direction cannot be resolved.
    Ambiguous = 3,
}

impl LrClass {
    /// Decodes a 2-bit LUT value. Returns `None` for values above 3.
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits <= 3).then(|| Self::from_low_bits(bits))
    }
    /// Decodes the two least significant bits of `bits`.
    pub fn from_low_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => LrClass::None,
            1 => LrClass::Right,
            2 => LrClass::Left,
            _ => LrClass::Ambiguous,
        }
    }
    pub fn bits(self) -> u8 {
        self as u8
    }
    /// Returns `true` for anything but [`LrClass::None`].
    pub fn is_hit(self) -> bool {
        self != LrClass::None
    }
    /// Returns `true` if the drift direction is resolved.
    pub fn is_unambiguous(self) -> bool {
        matches!(self, LrClass::Right | LrClass::Left)
    }
}

/// Priority LUT of a track segment.
///
/// Maps every wire pattern of `width` bits (bit `i` is wire `i` of the
/// segment) to an [`LrClass`]. The content is loaded once and never changes
/// during a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupTable {
    width: u32,
    inner: Vec<LrClass>,
}

impl LookupTable {
    /// Creates a table of `width`-bit patterns that classifies everything as
    /// [`LrClass::None`].
    ///
    /// # Panics
    ///
    /// Panics if `width` is larger than [`MAX_WIDTH`].
    ///
    /// # Examples
    ///
    /// ```
    /// use tsf::lut::{LookupTable, LrClass};
    ///
    /// let table = LookupTable::new(11);
    /// assert_eq!(table.get(0b101), LrClass::None);
    /// ```
    pub fn new(width: u32) -> Self {
        Self::from_fn(width, |_| LrClass::None)
    }
    /// Creates a table by classifying every pattern with `f`.
    ///
    /// # Panics
    ///
    /// Panics if `width` is larger than [`MAX_WIDTH`].
    pub fn from_fn<F>(width: u32, f: F) -> Self
    where
        F: FnMut(u32) -> LrClass,
    {
        assert!(width <= MAX_WIDTH, "LUT width {width} exceeds {MAX_WIDTH} bits");
        Self {
            width,
            inner: (0..1u32 << width).map(f).collect(),
        }
    }
    /// Number of pattern bits.
    pub fn width(&self) -> u32 {
        self.width
    }
    /// Returns the class of `pattern`. Bits above the table width are
    /// ignored.
    pub fn get(&self, pattern: u32) -> LrClass {
        self.inner[self.index(pattern)]
    }
    /// Sets the class of `pattern`, returning the previous one.
    ///
    /// # Examples
    ///
    /// ```
    /// use tsf::lut::{LookupTable, LrClass};
    ///
    /// let mut table = LookupTable::new(4);
    ///
    /// assert_eq!(table.set(0b0001, LrClass::Right), LrClass::None);
    /// assert_eq!(table.set(0b0001, LrClass::Left), LrClass::Right);
    /// assert_eq!(table.get(0b0001), LrClass::Left);
    /// ```
    pub fn set(&mut self, pattern: u32, class: LrClass) -> LrClass {
        let index = self.index(pattern);
        std::mem::replace(&mut self.inner[index], class)
    }
    /// Iterates over `(pattern, class)` for every pattern.
    pub fn iter(&self) -> impl Iterator<Item = (u32, LrClass)> + '_ {
        (0u32..).zip(self.inner.iter().copied())
    }

    fn index(&self, pattern: u32) -> usize {
        let mask = (1u32 << self.width) - 1;
        (pattern & mask) as usize
    }
}

impl fmt::Display for LookupTable {
    /// Writes the table as a COE memory initialization file, the format the
    /// firmware is built from.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "memory_initialization_radix=10;")?;
        writeln!(f, "memory_initialization_vector=")?;
        let last = self.inner.len() - 1;
        for (i, class) in self.inner.iter().enumerate() {
            let end = if i == last { ';' } else { ',' };
            writeln!(f, "{}{end}", class.bits())?;
        }

        Ok(())
    }
}

fn comment_line(input: &mut &str) -> winnow::Result<()> {
    (';', till_line_ending, line_ending)
        .void()
        .parse_next(input)
}

fn radix(input: &mut &str) -> winnow::Result<u32> {
    delimited(
        ("memory_initialization_radix", space0, '=', space0),
        alt(("10".value(10), "16".value(16), "2".value(2))),
        (space0, ';', line_ending),
    )
    .parse_next(input)
}

fn entry<'i>(radix: u32) -> impl Parser<&'i str, LrClass, ContextError> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric())
        .try_map(move |digits: &str| u8::from_str_radix(digits, radix))
        .verify_map(LrClass::from_bits)
}

fn coe(input: &mut &str) -> winnow::Result<Vec<LrClass>> {
    let () = repeat(0.., comment_line).parse_next(input)?;
    let radix = radix.parse_next(input)?;
    let _ = ("memory_initialization_vector", space0, '=', multispace0).parse_next(input)?;

    let entries: Vec<LrClass> = separated(1.., entry(radix), (space0, ',', multispace0))
        .verify(|entries: &Vec<LrClass>| {
            entries.len().is_power_of_two() && entries.len() <= 1 << MAX_WIDTH
        })
        .parse_next(input)?;
    let _ = (space0, ';', multispace0).parse_next(input)?;

    Ok(entries)
}

/// The error type returned when parsing a [`LookupTable`] fails.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: std::ops::Range<usize>,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        let input = error.input().to_string();
        let span = error.char_span();
        Self { input, span }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error
            .title("invalid LUT content starting here")
            .snippet(
                annotate_snippets::Snippet::source(&self.input)
                    .fold(true)
                    .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
            );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

impl std::str::FromStr for LookupTable {
    type Err = ParseError;

    /// Parse a [`LookupTable`] from a COE file. The number of entries must be
    /// a power of two; its logarithm is the table width.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tsf::lut::{LookupTable, LrClass};
    /// # use std::str::FromStr;
    /// let string = "memory_initialization_radix=10;
    /// memory_initialization_vector=
    /// 0,
    /// 1,
    /// 2,
    /// 3;
    /// ";
    /// let table = LookupTable::from_str(string)?;
    /// assert_eq!(table.width(), 2);
    /// assert_eq!(table.get(3), LrClass::Ambiguous);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let inner = coe.parse(input).map_err(ParseError::from_parse)?;
        let width = inner.len().trailing_zeros();

        Ok(Self { width, inner })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Node {
    Leaf(LrClass),
    // Selects `high` if pattern bit `bit` is set, `low` otherwise.
    Mux { bit: u32, low: usize, high: usize },
}

#[derive(Default)]
struct NodeTable {
    nodes: Vec<Node>,
    index: HashMap<Node, usize>,
}

impl NodeTable {
    fn intern(&mut self, node: Node) -> usize {
        if let Some(&id) = self.index.get(&node) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(node);
        self.index.insert(node, id);
        id
    }
}

/// Gate-level form of a [`LookupTable`].
///
/// The table is compiled into a reduced network of 2-to-1 multiplexers, one
/// per distinct sub-function, the way the LUT is realized in logic instead of
/// block memory. It classifies every pattern exactly like the table it was
/// built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicLut {
    width: u32,
    nodes: Vec<Node>,
    root: usize,
}

impl LogicLut {
    pub fn width(&self) -> u32 {
        self.width
    }
    /// Number of multiplexers in the network.
    pub fn gate_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Mux { .. }))
            .count()
    }
    /// Returns the class of `pattern`. Bits above the width are ignored.
    pub fn get(&self, pattern: u32) -> LrClass {
        let mut node = self.nodes[self.root];
        loop {
            match node {
                Node::Leaf(class) => return class,
                Node::Mux { bit, low, high } => {
                    let next = if pattern & (1 << bit) != 0 { high } else { low };
                    node = self.nodes[next];
                }
            }
        }
    }
}

impl From<&LookupTable> for LogicLut {
    fn from(table: &LookupTable) -> Self {
        let mut nodes = NodeTable::default();
        let mut layer: Vec<usize> = table
            .inner
            .iter()
            .map(|&class| nodes.intern(Node::Leaf(class)))
            .collect();
        // Entries 2j and 2j+1 of a layer differ only in `bit`.
        for bit in 0..table.width {
            layer = layer
                .chunks(2)
                .map(|pair| {
                    let (low, high) = (pair[0], pair[1]);
                    if low == high {
                        low
                    } else {
                        nodes.intern(Node::Mux { bit, low, high })
                    }
                })
                .collect();
        }

        Self {
            width: table.width,
            nodes: nodes.nodes,
            root: layer[0],
        }
    }
}

/// The priority LUT shared by all segments of a board type, evaluated either
/// as a memory lookup or through its gate-level form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lut {
    Table(LookupTable),
    Logic(LogicLut),
}

impl Lut {
    /// Wraps `table`, compiling it to logic if `logic` is set.
    pub fn new(table: LookupTable, logic: bool) -> Self {
        if logic {
            Lut::Logic(LogicLut::from(&table))
        } else {
            Lut::Table(table)
        }
    }
    pub fn width(&self) -> u32 {
        match self {
            Lut::Table(table) => table.width(),
            Lut::Logic(logic) => logic.width(),
        }
    }
    /// Classifies a wire pattern.
    pub fn classify(&self, pattern: u32) -> LrClass {
        match self {
            Lut::Table(table) => table.get(pattern),
            Lut::Logic(logic) => logic.get(pattern),
        }
    }
}
