use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};

pub const PAYLOAD_SEED: u64 = 101;
pub const SAMPLED_POSITIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityCheck {
    #[default]
    Sampled,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Consistent,
    SizeMismatch { wrote: usize, read: usize },
    ByteMismatch { position: usize, wrote: u8, read: u8 },
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integrity::Consistent => write!(f, "consistent"),
            Integrity::SizeMismatch { wrote, read } => {
                write!(f, "Size test failed: wrote: {wrote}B, read: {read}B")
            }
            Integrity::ByteMismatch {
                position,
                wrote,
                read,
            } => write!(
                f,
                "Random test failed: wrote[{position}]=0x{wrote:x} but read[{position}]=0x{read:x}"
            ),
        }
    }
}

/// Deterministic lowercase payload. The generator keeps running after the
/// payload is built and picks the sampled positions, so two runs with the same
/// size check the same positions in the same order.
pub struct Payload {
    data: Vec<u8>,
    rng: StdRng,
}

impl Payload {
    pub fn generate(size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PAYLOAD_SEED);
        let data = (0..size).map(|_| b'a' + rng.gen_range(0..26u8)).collect();
        Self { data, rng }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn verify(&mut self, echoed: &[u8], check: IntegrityCheck) -> Integrity {
        let upper = self.data.len().min(echoed.len());
        let positions: Vec<usize> = match check {
            IntegrityCheck::Full => (0..upper).collect(),
            IntegrityCheck::Sampled if upper == 0 => Vec::new(),
            IntegrityCheck::Sampled => (0..SAMPLED_POSITIONS.min(upper))
                .map(|_| self.rng.gen_range(0..upper))
                .collect(),
        };

        if self.data.len() != echoed.len() {
            return Integrity::SizeMismatch {
                wrote: self.data.len(),
                read: echoed.len(),
            };
        }
        positions
            .into_iter()
            .find(|&position| self.data[position] != echoed[position])
            .map_or(Integrity::Consistent, |position| Integrity::ByteMismatch {
                position,
                wrote: self.data[position],
                read: echoed[position],
            })
    }
}

#[cfg(test)]
mod test {
    use parameterized::parameterized;

    use super::{Integrity, IntegrityCheck, Payload};

    #[test]
    fn deterministic_lowercase() {
        let first = Payload::generate(4096);
        let second = Payload::generate(4096);
        assert_eq!(first.bytes(), second.bytes());
        assert!(first.bytes().iter().all(u8::is_ascii_lowercase));
    }

    #[parameterized(check = {IntegrityCheck::Sampled, IntegrityCheck::Full})]
    fn verify_echo(check: IntegrityCheck) {
        let mut payload = Payload::generate(1024);
        let echoed = payload.bytes().to_vec();
        assert_eq!(payload.verify(&echoed, check), Integrity::Consistent);
    }

    #[parameterized(check = {IntegrityCheck::Sampled, IntegrityCheck::Full})]
    fn verify_short_echo(check: IntegrityCheck) {
        let mut payload = Payload::generate(1024);
        let echoed = payload.bytes()[..1000].to_vec();
        assert_eq!(
            payload.verify(&echoed, check),
            Integrity::SizeMismatch {
                wrote: 1024,
                read: 1000
            }
        );
    }

    #[test]
    fn full_check_finds_single_corruption() {
        let mut payload = Payload::generate(1024);
        let mut echoed = payload.bytes().to_vec();
        echoed[777] = b'#';
        assert!(matches!(
            payload.verify(&echoed, IntegrityCheck::Full),
            Integrity::ByteMismatch { position: 777, read: b'#', .. }
        ));
    }

    #[test]
    fn sampled_check_finds_full_corruption() {
        let mut payload = Payload::generate(1024);
        let echoed = vec![b'#'; 1024];
        assert!(matches!(
            payload.verify(&echoed, IntegrityCheck::Sampled),
            Integrity::ByteMismatch { read: b'#', .. }
        ));
    }
}
