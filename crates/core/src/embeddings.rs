pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic local embedder over hashed character trigrams of each word.
///
/// Words are padded with boundary markers so short tokens still contribute.
/// Components are never negative, which keeps cosine distance within `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct HashedTrigramEmbedder {
    pub dimensions: usize,
}

impl Default for HashedTrigramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for HashedTrigramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];

        for word in text.split_whitespace() {
            let padded = format!(
                "<{}>",
                word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
            );
            let chars: Vec<char> = padded.chars().collect();
            for window in chars.windows(3) {
                let bucket = (fnv1a(window) % vector.len() as u64) as usize;
                vector[bucket] += 1.0;
            }
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

fn fnv1a(window: &[char]) -> u64 {
    let mut hash = 1469598103934665603u64;
    let mut buffer = [0u8; 4];
    for c in window {
        for byte in c.encode_utf8(&mut buffer).bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
    }
    hash
}

/// `1 - cosine_similarity`; zero vectors are maximally distant.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 1.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
        return 1.0;
    }
    (1.0 - dot / (left_norm * right_norm)).max(0.0)
}
