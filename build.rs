fn main() {
    println!("cargo:rerun-if-changed=migrations/0001_audit_records.sql");
    println!("cargo:rerun-if-env-changed=SKIP_MODEL_DOWNLOAD");

    // Only the oar backend needs model files on disk.
    if std::env::var_os("CARGO_FEATURE_OAR").is_some()
        && std::env::var_os("SKIP_MODEL_DOWNLOAD").is_none()
    {
        download_models();
    }
}

// ── Model download ────────────────────────────────────────────────────────────

const MODEL_BASE: &str = "https://github.com/GreatV/oar-ocr/releases/download/v0.3.0";

// Ticket crops are a single known line, so detection is skipped and only the
// recognition model plus its dictionary are fetched.
const MODELS: &[&str] = &["pp-ocrv5_mobile_rec.onnx", "ppocrv5_dict.txt"];

fn download_models() {
    let Some(manifest) = std::env::var_os("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=oar-ocr: CARGO_MANIFEST_DIR not set, skipping model download");
        return;
    };
    let models_dir = std::path::Path::new(&manifest).join("models");
    if let Err(e) = std::fs::create_dir_all(&models_dir) {
        println!("cargo:warning=oar-ocr: could not create models/: {e}");
        return;
    }

    for filename in MODELS {
        let dest = models_dir.join(filename);
        println!("cargo:rerun-if-changed=models/{filename}");

        if dest.exists() {
            continue;
        }

        let url = format!("{MODEL_BASE}/{filename}");
        println!("cargo:warning=oar-ocr: downloading {filename}…");

        // A failed download leaves the build intact; the recognizer reports the
        // missing file at runtime and the tesseract backend still works.
        let resp = match ureq::get(&url).call() {
            Ok(resp) => resp,
            Err(e) => {
                println!("cargo:warning=oar-ocr: failed to download {filename}: {e}");
                continue;
            }
        };

        let written = std::fs::File::create(&dest)
            .and_then(|mut file| std::io::copy(&mut resp.into_reader(), &mut file));
        match written {
            Ok(_) => println!("cargo:warning=oar-ocr: {filename} ready"),
            Err(e) => {
                println!("cargo:warning=oar-ocr: failed to write {filename}: {e}");
                let _ = std::fs::remove_file(&dest);
            }
        }
    }
}
