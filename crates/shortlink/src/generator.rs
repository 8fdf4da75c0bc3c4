use crate::{ALPHABET, DEFAULT_ID_LEN, RandSource, ShortId, ThreadRandom};

/// Produces short random identifiers.
///
/// Implementations are stateless from the caller's point of view and must be
/// cheap enough to call once per record per insert attempt.
pub trait IdGenerator: Send + Sync + 'static {
    /// Returns a fresh candidate identifier.
    fn next_id(&self) -> ShortId;
}

/// Fixed-length identifier generator over the 62-character alphanumeric
/// [`ALPHABET`].
///
/// Each character consumes one `u64` from the random source and is reduced
/// modulo 62; the resulting bias is below 2^-58 per character.
///
/// # Example
/// ```
/// use shortlink::{AlphanumericGenerator, IdGenerator};
///
/// let generator = AlphanumericGenerator::default();
/// let id = generator.next_id();
/// assert_eq!(id.len(), 6);
/// assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
/// ```
#[derive(Clone, Debug)]
pub struct AlphanumericGenerator<R = ThreadRandom>
where
    R: RandSource<u64>,
{
    len: usize,
    rng: R,
}

impl AlphanumericGenerator<ThreadRandom> {
    /// Creates a generator of `len`-character identifiers backed by the
    /// thread-local RNG.
    pub const fn new(len: usize) -> Self {
        Self::with_rng(len, ThreadRandom)
    }
}

impl<R> AlphanumericGenerator<R>
where
    R: RandSource<u64>,
{
    pub const fn with_rng(len: usize, rng: R) -> Self {
        Self { len, rng }
    }

    pub const fn id_len(&self) -> usize {
        self.len
    }
}

impl Default for AlphanumericGenerator<ThreadRandom> {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LEN)
    }
}

impl<R> IdGenerator for AlphanumericGenerator<R>
where
    R: RandSource<u64> + Send + Sync + 'static,
{
    fn next_id(&self) -> ShortId {
        (0..self.len)
            .map(|_| ALPHABET[(self.rng.rand() % ALPHABET.len() as u64) as usize] as char)
            .collect()
    }
}
