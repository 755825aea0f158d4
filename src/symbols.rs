//! Symbol Resolver (spec §4.1). Builds a name/address/size table per
//! loaded image up front via `nm -S`, and keeps a persistent `addr2line`
//! child process per image for PC-to-function resolution, grounded on
//! the teacher's subprocess style in `cargo-rtic-trace::building` (spawn
//! with piped stdio, `BufReader` over the child's stdout).
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// One resolved symbol from an image's symbol table.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub name: String,
    pub section_code: char,
    pub size: u32,
    pub addr: u32,
}

/// Sections `nm -S` reports that this resolver cares about: text, data,
/// weak, bss — both upper and lower case variants are valid (spec §4.1).
fn is_tracked_section(code: char) -> bool {
    matches!(code.to_ascii_lowercase(), 't' | 'd' | 'w' | 'b')
}

struct Addr2LineHandle {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Addr2LineHandle {
    fn spawn(image: &Path) -> Option<Self> {
        let mut child = Command::new("addr2line")
            .arg("-f")
            .arg("-e")
            .arg(image)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        let stdin = child.stdin.take()?;
        let stdout = BufReader::new(child.stdout.take()?);
        Some(Self { child, stdin, stdout })
    }

    /// Queries the function name containing `addr`. Returns `None` on
    /// any I/O failure or a `??` reply (degrade silently, spec §9).
    fn query(&mut self, addr: u32) -> Option<String> {
        writeln!(self.stdin, "0x{:08x}", addr).ok()?;
        let mut func_line = String::new();
        self.stdout.read_line(&mut func_line).ok()?;
        // addr2line -f prints function name then source location; we
        // only need the first line and must still drain the second so
        // the pipe doesn't desync on the next query.
        let mut _loc_line = String::new();
        self.stdout.read_line(&mut _loc_line).ok()?;

        let name = func_line.trim();
        if name.is_empty() || name == "??" {
            None
        } else {
            Some(name.to_string())
        }
    }
}

impl Drop for Addr2LineHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One loaded image's symbol table plus its `addr2line` pipe, in load
/// order. Load order is lookup priority for name-based queries;
/// later-loaded images win on exact-address symbol-table collisions
/// (last-write-wins, spec §9).
pub struct SymbolResolver {
    by_addr: HashMap<u32, SymbolRecord>,
    by_name: Vec<(String, SymbolRecord)>,
    addr2line: Vec<Addr2LineHandle>,
}

impl Default for SymbolResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolResolver {
    pub fn new() -> Self {
        Self {
            by_addr: HashMap::new(),
            by_name: Vec::new(),
            addr2line: Vec::new(),
        }
    }

    /// Loads an image's symbol table (via `nm -S`) and, if possible,
    /// starts an `addr2line` process for it. Never fails: a missing or
    /// unreadable image simply contributes nothing (spec §4.1 "errors
    /// are non-fatal").
    pub fn load_image(&mut self, path: &Path) {
        if let Ok(output) = Command::new("nm").arg("-S").arg(path).output() {
            for record in parse_nm_output(&output.stdout) {
                self.by_addr.insert(record.addr, record.clone());
                self.by_name.push((record.name.clone(), record));
            }
        }
        if let Some(handle) = Addr2LineHandle::spawn(path) {
            self.addr2line.push(handle);
        }
    }

    pub fn name_to_addr(&self, name: &str) -> Option<u32> {
        self.by_name
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rec)| rec.addr)
    }

    pub fn name_to_size(&self, name: &str) -> Option<u32> {
        self.by_name
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, rec)| rec.size)
    }

    pub fn addr_to_name(&self, addr: u32) -> Option<&str> {
        self.by_addr.get(&addr).map(|r| r.name.as_str())
    }

    pub fn addr_to_size(&self, addr: u32) -> Option<u32> {
        self.by_addr.get(&addr).map(|r| r.size)
    }

    /// Resolves the function containing `addr` across all loaded
    /// images; the first image whose `addr2line` doesn't reply `??`
    /// wins. Returns `""` if nothing resolves (spec §4.1).
    pub fn addr_to_function(&mut self, addr: u32) -> String {
        for handle in self.addr2line.iter_mut() {
            if let Some(name) = handle.query(addr) {
                return name;
            }
        }
        String::new()
    }
}

fn parse_nm_output(stdout: &[u8]) -> Vec<SymbolRecord> {
    let text = String::from_utf8_lossy(stdout);
    let mut records = Vec::new();
    for line in text.lines() {
        // `nm -S` format: "<addr> <size> <type> <name>" (size column
        // absent for some symbol kinds, which we skip).
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 4 {
            continue;
        }
        let (addr_s, size_s, type_s, name) = (fields[0], fields[1], fields[2], fields[3]);
        let section_code = match type_s.chars().next() {
            Some(c) if is_tracked_section(c) => c,
            _ => continue,
        };
        let (Ok(addr), Ok(size)) = (
            u32::from_str_radix(addr_s, 16),
            u32::from_str_radix(size_s, 16),
        ) else {
            continue;
        };
        records.push(SymbolRecord {
            name: name.to_string(),
            section_code,
            size,
            addr,
        });
    }
    records
}

/// Convenience used by the Watchpoint Manager's `setup_watch` helper
/// (spec §4.3): explicit address/size override symbol lookup.
pub fn resolve_watch_target(
    resolver: &SymbolResolver,
    symbol: Option<&str>,
    addr: Option<u32>,
    size: Option<u32>,
) -> (u32, u32) {
    let resolved_addr = addr
        .or_else(|| symbol.and_then(|s| resolver.name_to_addr(s)))
        .unwrap_or(0);
    let resolved_size = size
        .or_else(|| symbol.and_then(|s| resolver.name_to_size(s)))
        .unwrap_or(4);
    (resolved_addr, if resolved_size == 0 { 4 } else { resolved_size })
}

#[cfg(test)]
impl SymbolResolver {
    /// Injects a symbol directly, bypassing `nm`, so other modules' tests
    /// can exercise resolver-dependent rendering without a real image.
    pub fn insert_for_test(&mut self, addr: u32, name: &str) {
        self.by_addr.insert(
            addr,
            SymbolRecord {
                name: name.to_string(),
                section_code: 't',
                size: 0,
                addr,
            },
        );
        self.by_name.push((
            name.to_string(),
            SymbolRecord {
                name: name.to_string(),
                section_code: 't',
                size: 0,
                addr,
            },
        ));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_nm_output_keeps_tracked_sections_only() {
        let output = b"08000000 00000004 T main\n08000010 00000008 t helper\n         U external\n";
        let records = parse_nm_output(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "main");
        assert_eq!(records[0].addr, 0x0800_0000);
        assert_eq!(records[0].size, 4);
    }

    #[test]
    fn resolver_with_no_images_returns_none() {
        let resolver = SymbolResolver::new();
        assert_eq!(resolver.name_to_addr("main"), None);
        assert_eq!(resolver.addr_to_name(0x1000), None);
    }

    #[test]
    fn resolve_watch_target_prefers_explicit_over_symbol() {
        let resolver = SymbolResolver::new();
        let (addr, size) = resolve_watch_target(&resolver, Some("counter"), Some(0x2000), None);
        assert_eq!(addr, 0x2000);
        assert_eq!(size, 4);
    }
}
