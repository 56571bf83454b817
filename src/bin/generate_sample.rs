use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use num_complex::Complex64;
use phasediff::config::ExperimentConfig;
use phasediff::data::calibrate::{Bin, RawRecord};

/// Bridge-admittance-like transfer function: a sum of damped resonances.
fn admittance(f: f64, modes: &[(f64, f64, f64)]) -> Complex64 {
    modes
        .iter()
        .map(|&(f0, q, amp)| {
            let r = f / f0;
            Complex64::new(0.0, amp * r) / Complex64::new(1.0 - r * r, r / q)
        })
        .sum()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn record(
    config: &ExperimentConfig,
    modes: &[(f64, f64, f64)],
    rng: &mut SimpleRng,
) -> RawRecord {
    let cal = &config.calibration;
    let bins = cal.bins();
    let nyquist = (cal.sample_rate / 2) as f64;
    let step = nyquist / (bins - 1) as f64;

    let mut excitation = Vec::with_capacity(bins);
    let mut response = Vec::with_capacity(bins);
    for i in 0..bins {
        let f = i as f64 * step;
        // hammer roll-off, never zero
        let force = (1.0 + rng.gauss(0.0, 0.01)) / (1.0 + f / 8_000.0);
        let h = admittance(f, modes) * (1.0 + rng.gauss(0.0, 0.02));
        let velocity = h * force * cal.force_sensitivity / cal.velocity_sensitivity;
        excitation.push(Bin::Real(force));
        response.push(Bin::Complex([velocity.re, velocity.im]));
    }

    RawRecord {
        sample_rate: Some(cal.sample_rate),
        transform_length: Some(cal.transform_length),
        excitation: Some(excitation),
        response: Some(response),
        ..RawRecord::default()
    }
}

fn write_json(path: &Path, record: &RawRecord) {
    let file = File::create(path).expect("create record file");
    serde_json::to_writer(BufWriter::new(file), record).expect("write record");
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ExperimentConfig::default();
    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.layout.raw_dir.clone());
    let mut rng = SimpleRng::new(42);

    // (frequency, quality factor, amplitude) of the low body modes
    let base: [(f64, f64, f64); 4] = [
        (280.0, 25.0, 0.6),
        (450.0, 30.0, 1.0),
        (540.0, 35.0, 0.8),
        (2_300.0, 12.0, 0.5),
    ];

    let mut written = 0;
    for &condition in &config.design.conditions {
        for (rank, instrument) in config.design.instruments.iter().enumerate() {
            let dir = root
                .join(format!("phase_{condition}"))
                .join(instrument)
                .join(&config.layout.record_kind);
            fs::create_dir_all(&dir).expect("create partition directory");

            // each instrument its own tuning, each later phase slightly stiffer
            let shift = 1.0 + 0.03 * rank as f64 + 0.01 * (condition as f64 - 1.0);
            let modes: Vec<(f64, f64, f64)> = base
                .iter()
                .map(|&(f0, q, amp)| (f0 * shift, q, amp))
                .collect();

            for trial in 1..=3 {
                let path = dir.join(format!("{instrument}_P{condition}_{trial}.json"));
                write_json(&path, &record(&config, &modes, &mut rng));
                written += 1;
            }
        }
    }

    log::info!("Wrote {written} raw records under {}", root.display());
}
