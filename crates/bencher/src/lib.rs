use bytes::Bytes;

/// A body to push through a benchmark, `chunks` chunks of `chunk_size` bytes.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    chunk_size: usize,
    chunks: usize,
}

impl TestCase {
    pub const fn new(name: &'static str, group: TestGroup, chunk_size: usize, chunks: usize) -> Self {
        Self { name, group, chunk_size, chunks }
    }

    pub const fn small(name: &'static str, chunk_size: usize, chunks: usize) -> Self {
        Self::new(name, TestGroup::Small, chunk_size, chunks)
    }

    pub const fn normal(name: &'static str, chunk_size: usize, chunks: usize) -> Self {
        Self::new(name, TestGroup::Normal, chunk_size, chunks)
    }

    pub const fn large(name: &'static str, chunk_size: usize, chunks: usize) -> Self {
        Self::new(name, TestGroup::Large, chunk_size, chunks)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn body_len(&self) -> usize {
        self.chunk_size * self.chunks
    }

    /// The body chunks, filled with printable bytes.
    pub fn chunks(&self) -> Vec<Bytes> {
        (b'a'..=b'z')
            .cycle()
            .take(self.chunks)
            .map(|letter| Bytes::from(vec![letter; self.chunk_size]))
            .collect()
    }
}

/// The standard body shapes.
pub fn body_cases() -> Vec<TestCase> {
    vec![
        TestCase::small("small_body", 64, 4),
        TestCase::normal("normal_body", 1024, 32),
        TestCase::large("large_body", 16 * 1024, 64),
    ]
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
