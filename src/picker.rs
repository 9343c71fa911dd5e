//! Numbered file chooser over files matching a glob.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use dslink_helper_core::contract::FilePicker;

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub recent: bool,
}

pub struct GlobFilePicker<R, W> {
    search_root: PathBuf,
    input: Mutex<R>,
    output: Mutex<W>,
}

impl GlobFilePicker<BufReader<io::Stdin>, io::Stderr> {
    pub fn stdio(search_root: impl Into<PathBuf>) -> Self {
        Self::new(search_root, BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R, W> GlobFilePicker<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    pub fn new(search_root: impl Into<PathBuf>, input: R, output: W) -> Self {
        Self {
            search_root: search_root.into(),
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recents that still exist first, then matches under the search root,
    /// without duplicates.
    pub fn candidates(&self, pattern: &str, recents: &[PathBuf]) -> io::Result<Vec<Candidate>> {
        let matcher = compile(pattern)?;
        let mut seen = HashSet::new();
        let mut list = Vec::new();

        for recent in recents.iter().filter(|p| p.is_file()) {
            if seen.insert(canonical(recent)) {
                list.push(Candidate {
                    path: recent.clone(),
                    recent: true,
                });
            }
        }

        let mut found = matching_files(&self.search_root, &matcher);
        found.sort();
        for path in found {
            if seen.insert(canonical(&path)) {
                list.push(Candidate { path, recent: false });
            }
        }
        debug!(pattern, count = list.len(), "Collected file candidates");
        Ok(list)
    }

    fn choose(&self, candidates: &[Candidate]) -> io::Result<Option<PathBuf>> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        if candidates.is_empty() {
            writeln!(output, "No matching files found under {}", self.search_root.display())?;
            return Ok(None);
        }
        for (index, candidate) in candidates.iter().enumerate() {
            let note = if candidate.recent { " (recently used)" } else { "" };
            writeln!(output, "{:>3}) {}{note}", index + 1, candidate.path.display())?;
        }

        let mut input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            write!(output, "File to send [1-{}]: ", candidates.len())?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let answer = line.trim();
            if answer.is_empty() {
                return Ok(None);
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=candidates.len()).contains(&n) => {
                    return Ok(Some(candidates[n - 1].path.clone()));
                }
                _ => writeln!(output, "Pick a number between 1 and {}.", candidates.len())?,
            }
        }
    }
}

impl<R, W> FilePicker for GlobFilePicker<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn pick_file(&self, pattern: &str, recents: Vec<PathBuf>) -> io::Result<Option<PathBuf>> {
        let candidates = self.candidates(pattern, &recents)?;
        self.choose(&candidates)
    }
}

fn compile(pattern: &str) -> io::Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn matching_files(root: &Path, matcher: &GlobMatcher) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let relative = e.path().strip_prefix(root).unwrap_or(e.path());
            matcher.is_match(relative)
        })
        .map(DirEntry::into_path)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build")).unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("build/b.3dsx"), "").unwrap();
        fs::write(dir.path().join("a.3dsx"), "").unwrap();
        fs::write(dir.path().join("target/debug/skip.3dsx"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        dir
    }

    fn picker(root: &Path, input: &str) -> GlobFilePicker<Cursor<Vec<u8>>, Vec<u8>> {
        GlobFilePicker::new(root, Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn matches_are_sorted_and_skip_build_dirs() {
        let dir = tree();
        let list = picker(dir.path(), "").candidates("**/*.3dsx", &[]).unwrap();
        let paths: Vec<_> = list.iter().map(|c| c.path.clone()).collect();
        assert_eq!(
            paths,
            [dir.path().join("a.3dsx"), dir.path().join("build/b.3dsx")]
        );
    }

    #[test]
    fn existing_recents_come_first_once() {
        let dir = tree();
        let recents = vec![
            dir.path().join("build/b.3dsx"),
            dir.path().join("gone.3dsx"),
        ];
        let list = picker(dir.path(), "").candidates("**/*.3dsx", &recents).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            list[0],
            Candidate {
                path: dir.path().join("build/b.3dsx"),
                recent: true
            }
        );
        assert!(!list[1].recent);
    }

    #[test]
    fn search_root_named_like_a_skipped_dir_is_still_searched() {
        let dir = tree();
        let root = dir.path().join("target");
        let list = picker(&root, "").candidates("**/*.3dsx", &[]).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path, root.join("debug/skip.3dsx"));
    }

    #[test]
    fn nested_skipped_dirs_are_pruned_at_any_depth() {
        let dir = tree();
        fs::create_dir_all(dir.path().join("build/.git/objects")).unwrap();
        fs::write(dir.path().join("build/.git/objects/hidden.3dsx"), "").unwrap();
        let list = picker(dir.path(), "").candidates("**/*.3dsx", &[]).unwrap();
        assert!(list
            .iter()
            .all(|c| !c.path.to_string_lossy().contains(".git")));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn invalid_pattern_is_invalid_input() {
        let dir = tree();
        let err = picker(dir.path(), "").candidates("[", &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn numbered_choice_after_a_bad_answer() {
        let dir = tree();
        let picker = picker(dir.path(), "7\n2\n");
        let chosen = picker.pick_file("**/*.3dsx", Vec::new()).unwrap();
        assert_eq!(chosen, Some(dir.path().join("build/b.3dsx")));
        let shown = String::from_utf8(picker.into_output()).unwrap();
        assert!(shown.contains("Pick a number between 1 and 2."));
    }

    #[test]
    fn blank_answer_or_no_matches_picks_nothing() {
        let dir = tree();
        assert_eq!(picker(dir.path(), "\n").pick_file("**/*.3dsx", Vec::new()).unwrap(), None);
        assert_eq!(picker(dir.path(), "1\n").pick_file("**/*.cia", Vec::new()).unwrap(), None);
    }
}
