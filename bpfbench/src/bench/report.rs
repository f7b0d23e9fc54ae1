//! Rendering of delta results in Go benchmark style.

use std::{
    collections::HashMap,
    fmt::{self, Write},
};

use serde::Serialize;

use crate::bench::delta::DeltaResult;

/// Delta results sorted by name (then fd, for programs sharing a name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaReport {
    results: Vec<DeltaResult>,
}

#[derive(Serialize)]
struct ReportRow<'a> {
    name: &'a str,
    fd: i32,
    iterations: u64,
    elapsed_ns: u64,
    ns_per_op: f64,
}

impl DeltaReport {
    pub fn new(mut results: Vec<DeltaResult>) -> Self {
        results.sort_by(|a, b| a.name.cmp(&b.name).then(a.fd.cmp(&b.fd)));
        Self { results }
    }

    pub fn results(&self) -> &[DeltaResult] {
        &self.results
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// One line per program: `{bench}/eBPF/{name}\t{result}`, names padded to
    /// the longest one. Programs sharing a name are told apart as `{name}#{fd}`.
    pub fn render(&self, bench_name: &str) -> String {
        let labels = self.labels();
        let width = labels.iter().map(String::len).max().unwrap_or(0);

        let mut buf = String::new();
        for (label, result) in labels.iter().zip(&self.results) {
            let _ = writeln!(
                buf,
                "{}/eBPF/{:<width$}\t{}",
                bench_name,
                label,
                result,
                width = width
            );
        }
        buf
    }

    fn labels(&self) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for result in &self.results {
            *counts.entry(result.name.as_str()).or_default() += 1;
        }

        self.results
            .iter()
            .map(|r| match counts.get(r.name.as_str()) {
                Some(&n) if n > 1 => format!("{}#{}", r.name, r.fd),
                _ => r.name.clone(),
            })
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let rows: Vec<ReportRow<'_>> = self
            .results
            .iter()
            .map(|r| ReportRow {
                name: &r.name,
                fd: r.fd,
                iterations: r.iterations,
                elapsed_ns: r.elapsed.as_nanos() as u64,
                ns_per_op: r.ns_per_op(),
            })
            .collect();
        serde_json::to_string_pretty(&rows)
    }
}

impl fmt::Display for DeltaResult {
    /// `%8d` iterations, then ns/op when the program ran at all.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:8}", self.iterations)?;
        let ns = self.ns_per_op();
        if ns != 0.0 {
            write!(f, "\t{}", pretty_print(ns, "ns/op"))?;
        }
        Ok(())
    }
}

/// Fixed-width value with precision chosen by magnitude.
fn pretty_print(x: f64, unit: &str) -> String {
    let y = x.abs();
    if y == 0.0 || y >= 999.95 {
        format!("{:10.0} {}", x, unit)
    } else if y >= 99.995 {
        format!("{:12.1} {}", x, unit)
    } else if y >= 9.9995 {
        format!("{:13.2} {}", x, unit)
    } else if y >= 0.99995 {
        format!("{:14.3} {}", x, unit)
    } else if y >= 0.099995 {
        format!("{:15.4} {}", x, unit)
    } else if y >= 0.0099995 {
        format!("{:16.5} {}", x, unit)
    } else if y >= 0.00099995 {
        format!("{:17.6} {}", x, unit)
    } else {
        format!("{:18.7} {}", x, unit)
    }
}
