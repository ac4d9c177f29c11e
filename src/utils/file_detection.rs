//! Text/binary classification for scanned files.
//!
//! A file enters the aggregation candidate set only if this module
//! calls it text. The checks run in a fixed order: size ceiling, known
//! binary extensions, per-extension configuration overrides, known text
//! extensions, MIME guess by extension, excluded basenames, and finally
//! a null-byte sniff of the first kilobyte. Any I/O failure along the
//! way classifies the file as not text rather than raising.

use std::io::Read;
use std::path::Path;

use crate::config::AppConfig;

/// Bytes inspected by the content sniff.
const SNIFF_BYTES: usize = 1024;

/// Extensions (or extensionless basenames) accepted as text without a
/// MIME lookup. Lowercase; names that carry no extension, such as
/// `makefile`, are listed by their full basename.
const TEXT_EXTENSIONS: &[&str] = &[
    // Plain text and markup
    "txt", "md", "markdown", "rst", "adoc", "org", "tex", "bib",
    // Programming languages
    "rs", "py", "pyi", "js", "jsx", "ts", "tsx", "mjs", "cjs", "c", "h", "cpp", "hpp", "cc",
    "hh", "cs", "java", "kt", "kts", "scala", "go", "rb", "php", "swift", "m", "mm", "lua",
    "pl", "pm", "r", "jl", "ex", "exs", "erl", "hrl", "hs", "elm", "clj", "cljs", "edn",
    "zig", "nim", "d", "dart", "groovy", "vb", "fs", "fsx",
    // Shell and scripts
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd", "awk", "sed",
    // Web
    "html", "htm", "xml", "xhtml", "svg", "css", "scss", "sass", "less", "vue", "svelte",
    "astro",
    // Data and config
    "json", "json5", "jsonl", "yaml", "yml", "toml", "ini", "cfg", "conf", "properties",
    "env", "sql", "graphql", "gql", "proto", "thrift", "cmake", "gradle", "sbt",
    // Extensionless basenames
    "makefile", "dockerfile", "justfile", "gemfile", "rakefile", "procfile", "readme",
    "license", "changelog", "codeowners", ".gitignore", ".gitattributes", ".editorconfig",
    ".dockerignore",
];

/// Extensions rejected outright, before any override or MIME lookup.
const BINARY_EXTENSIONS: &[&str] = &[
    // Executables and libraries
    "exe", "dll", "so", "dylib", "a", "lib", "o", "obj", "bin", "wasm", "class", "jar",
    "war", "pyc", "pyo", "pyd", "rlib", "rmeta",
    // Archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "zst", "tgz",
    // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp",
    // Fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // Audio and video
    "mp3", "wav", "flac", "ogg", "m4a", "mp4", "avi", "mkv", "mov", "webm", "wmv",
    // Databases and images of systems
    "db", "sqlite", "sqlite3", "mdb", "iso", "img", "dmg", "deb", "rpm", "msi", "apk",
];

/// Image formats, kept separate from the general binary list.
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp", "ico", "icns", "heic",
    "avif", "psd",
];

/// Decides whether `path` should be offered for aggregation.
pub fn is_text_file(path: &Path, config: &AppConfig) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !metadata.is_file() {
        return false;
    }
    if metadata.len() > config.max_file_size_bytes() {
        return false;
    }

    let key = extension_key(path);
    if BINARY_EXTENSIONS.contains(&key.as_str()) || IMAGE_EXTENSIONS.contains(&key.as_str()) {
        return false;
    }

    let looks_textual = match config.extension_overrides.get(&key) {
        Some(&enabled) => enabled,
        None => TEXT_EXTENSIONS.contains(&key.as_str()) || has_text_mime(path),
    };
    if !looks_textual {
        return false;
    }

    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if config.excluded_filenames.contains(name) {
            return false;
        }
    }

    content_looks_textual(path)
}

/// Lookup key for the extension tables: the lowercase extension, or the
/// lowercase basename for extensionless files like `Makefile`.
fn extension_key(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase(),
    }
}

fn has_text_mime(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.type_() == mime_guess::mime::TEXT)
        .unwrap_or(false)
}

/// Reads up to the first kilobyte and rejects the file if it contains
/// null bytes. Read failures count as not textual.
fn content_looks_textual(path: &Path) -> bool {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut buffer = [0u8; SNIFF_BYTES];
    let read = match file.read(&mut buffer) {
        Ok(n) => n,
        Err(_) => return false,
    };
    !buffer[..read].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn known_text_extensions_are_accepted() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = write(&dir, "main.rs", b"fn main() {}\n");
        assert!(is_text_file(&path, &config));
    }

    #[test]
    fn binary_extensions_are_rejected_even_with_text_content() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = write(&dir, "tool.exe", b"actually just text");
        assert!(!is_text_file(&path, &config));
    }

    #[test]
    fn image_extensions_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = write(&dir, "logo.png", b"\x89PNG\r\n");
        assert!(!is_text_file(&path, &config));
    }

    #[test]
    fn override_can_disable_a_text_extension() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.extension_overrides.insert("md".to_string(), false);
        let path = write(&dir, "notes.md", b"# heading\n");
        assert!(!is_text_file(&path, &config));
    }

    #[test]
    fn override_can_enable_an_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "trace.customlog", b"line one\nline two\n");

        let mut config = AppConfig::default();
        assert!(!is_text_file(&path, &config));

        config
            .extension_overrides
            .insert("customlog".to_string(), true);
        assert!(is_text_file(&path, &config));
    }

    #[test]
    fn mime_guess_covers_extensions_missing_from_the_table() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        // csv is deliberately absent from TEXT_EXTENSIONS; text/csv
        // comes from the MIME lookup.
        let path = write(&dir, "data.csv", b"a,b,c\n1,2,3\n");
        assert!(is_text_file(&path, &config));
    }

    #[test]
    fn null_bytes_reject_an_otherwise_textual_file() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = write(&dir, "weird.txt", b"looks fine\x00until here");
        assert!(!is_text_file(&path, &config));
    }

    #[test]
    fn size_ceiling_rejects_large_files() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.max_file_size_mb = 1;
        let big = "x".repeat(1024 * 1024 + 512 * 1024);
        let path = write(&dir, "big.txt", big.as_bytes());
        assert!(!is_text_file(&path, &config));

        let small = write(&dir, "small.txt", b"fits\n");
        assert!(is_text_file(&small, &config));
    }

    #[test]
    fn excluded_basenames_are_rejected() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = write(&dir, "package-lock.json", b"{\"lockfileVersion\": 3}\n");
        assert!(!is_text_file(&path, &config));
    }

    #[test]
    fn extensionless_well_known_names_are_text() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let makefile = write(&dir, "Makefile", b"all:\n\techo hi\n");
        assert!(is_text_file(&makefile, &config));

        let gitignore = write(&dir, ".gitignore", b"target/\n");
        assert!(is_text_file(&gitignore, &config));
    }

    #[test]
    fn unknown_extensionless_names_are_not_text() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = write(&dir, "mystery", b"some bytes");
        assert!(!is_text_file(&path, &config));
    }

    #[test]
    fn missing_files_and_directories_are_not_text() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        assert!(!is_text_file(&dir.path().join("absent.txt"), &config));
        assert!(!is_text_file(dir.path(), &config));
    }
}
