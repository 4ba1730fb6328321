#![allow(dead_code)]
use std::fs;
use std::io;
use std::path::Path;

/// Hela Target PSMs per day. The last day falls far below the others.
pub const TARGET_PSMS: [i64; 6] = [15000, 15100, 14900, 15050, 14950, 9000];

const PSM_HEADER: &str = "Peptide Sequence\tBase Peptide Sequence\tDecoy?\tPrecursor Mass Error (ppm)\tFraction of Intensity Matching\tRatio of Matching Products\n";

/// Lay out one instrument's search outputs and iRT logs under `data_root`
pub fn write_instrument(data_root: &Path, instrument: &str) -> io::Result<()> {
    let data_dir = data_root.join(instrument);
    let raw_dir = data_dir.join("instrument_data");
    fs::create_dir_all(&raw_dir)?;
    for (i, psms) in TARGET_PSMS.iter().enumerate() {
        let stamp = format!("1501{:02}120000", i + 1);
        let out = data_dir.join("hela_morpheus").join(format!("Hela_{stamp}"));
        fs::create_dir_all(&out)?;
        fs::write(
            out.join("summary.tsv"),
            format!("Dataset\tTarget PSMs\nHela_{stamp}.raw\t{psms}\n"),
        )?;
        fs::write(
            out.join(format!("Hela_{stamp}.PSMs.tsv")),
            format!(
                "{PSM_HEADER}PEPTIDEK\tPEPTIDEK\tFalse\t1.5\t0.6\t0.5\nLESSK\tLESSK\tFalse\t2.5\t0.4\t0.5\nDECOYK\tDECOYK\tTrue\t40.0\t0.1\t0.1\n"
            ),
        )?;
        let rt_b = 10.0 + 0.01 * i as f64;
        fs::write(
            raw_dir.join(format!("Hela_iRT_{stamp}.txt")),
            format!(
                "Component Name  ; RT ; Height\niRT-pep_b ; {rt_b} ; 1.5e6\niRT-pep_c ; {} ; 1.2e6\niRT-pep_k ; {} ; 2.0e6\n",
                rt_b + 5.0,
                rt_b + 20.0
            ),
        )?;
    }
    fs::write(data_dir.join("description.txt"), "Thermo QExactive Plus\n")?;
    Ok(())
}

/// A PSM table for a seventh day whose intensity fractions are unreadable
pub fn write_malformed_psms(data_root: &Path, instrument: &str) -> io::Result<()> {
    let stamp = "150107120000";
    let out = data_root
        .join(instrument)
        .join("hela_morpheus")
        .join(format!("Hela_{stamp}"));
    fs::create_dir_all(&out)?;
    fs::write(
        out.join(format!("Hela_{stamp}.PSMs.tsv")),
        format!("{PSM_HEADER}PEPTIDEK\tPEPTIDEK\tFalse\t1.5\tn/a\t0.5\n"),
    )
}
