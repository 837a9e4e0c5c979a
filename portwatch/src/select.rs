//! Selection policy and the presentable endpoint list.
//!
//! Endpoints are sorted with a natural, case-insensitive comparison on
//! `path` so `COM10` follows `COM9`. The picker mirrors what a port
//! dropdown shows: one entry per endpoint, an optional "virtual" entry, and
//! a trailing "manual" entry. In firmware-update mode it is replaced by a
//! DFU entry plus "manual".

use std::cmp::Ordering;

use log::info;

use crate::device::Endpoint;
use crate::settings::OsFamily;

/// Picker value of the firmware-update entry.
pub const DFU_VALUE: &str = "DFU";

/// Picker value of the manual entry.
pub const MANUAL_VALUE: &str = "manual";

/// Picker value of the virtual entry.
pub const VIRTUAL_VALUE: &str = "virtual";

/// Natural ordering: digit runs compare numerically, letters ignore case.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let lnum = take_digits(&mut left);
                let rnum = take_digits(&mut right);
                let ord = compare_digit_runs(&lnum, &rnum);
                if ord != Ordering::Equal {
                    return ord;
                }
            },
            (Some(l), Some(r)) => {
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            },
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Sort endpoints by path for presentation.
pub fn sort_ports(mut ports: Vec<Endpoint>) -> Vec<Endpoint> {
    ports.sort_by(|a, b| natural_cmp(&a.path, &b.path));
    ports
}

fn is_recognized(name: &str) -> bool {
    name.contains("STM") || name.contains("CP210") || name.starts_with("SPR")
}

/// Pick a default endpoint by display name.
///
/// Zero matches and several matches are both fine; the last match wins.
pub fn auto_select(ports: &[Endpoint], os: OsFamily) -> Option<&Endpoint> {
    let mut chosen = None;
    for port in ports {
        let Some(name) = port.display_name.as_deref() else {
            continue;
        };
        let recognized = is_recognized(name);
        let legacy = name.contains("usb");
        let is_tty = port.path.contains("tty");

        if (os == OsFamily::Windows && recognized) || (is_tty && (recognized || legacy)) {
            info!("Detected device {name} on port: {}", port.path);
            chosen = Some(port);
        }
    }
    chosen
}

/// What a picker entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EntryKind {
    /// A discovered endpoint.
    Port,
    /// Virtual (no hardware) mode.
    Virtual,
    /// Manually entered port.
    Manual,
    /// Target in firmware-update mode.
    Dfu,
}

/// One row of the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PickerEntry {
    /// Value reported on selection (the endpoint path for ports).
    pub value: String,
    /// Text shown to the user.
    pub label: String,
    /// Entry kind.
    pub kind: EntryKind,
}

impl PickerEntry {
    fn new(value: &str, label: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            value: value.to_string(),
            label: label.into(),
            kind,
        }
    }
}

/// The presentable endpoint list and current selection.
#[derive(Debug, Clone, Default)]
pub struct PortPicker {
    entries: Vec<PickerEntry>,
    selected: Option<String>,
}

impl PortPicker {
    /// Create an empty picker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entries with `ports`, sorted. Returns the sorted ports.
    ///
    /// The selection is kept if its value is still listed, otherwise it
    /// falls back to the first entry.
    pub fn rebuild(&mut self, ports: Vec<Endpoint>, show_virtual: bool) -> Vec<Endpoint> {
        let ports = sort_ports(ports);

        self.entries = ports
            .iter()
            .map(|p| PickerEntry::new(&p.path, p.label(), EntryKind::Port))
            .collect();
        if show_virtual {
            self.entries
                .push(PickerEntry::new(VIRTUAL_VALUE, "Virtual Mode (Experimental)", EntryKind::Virtual));
        }
        self.entries
            .push(PickerEntry::new(MANUAL_VALUE, "Manual Selection", EntryKind::Manual));

        let still_listed = self
            .selected
            .as_deref()
            .is_some_and(|value| self.entry(value).is_some());
        if !still_listed {
            self.selected = self.entries.first().map(|e| e.value.clone());
        }

        ports
    }

    /// Replace the entries with the firmware-update entry plus "manual" and
    /// select it.
    pub fn show_dfu(&mut self, product_name: Option<&str>) {
        let label = match product_name {
            Some(name) => format!("{DFU_VALUE} - {name}"),
            None => DFU_VALUE.to_string(),
        };
        self.entries = vec![
            PickerEntry::new(DFU_VALUE, label, EntryKind::Dfu),
            PickerEntry::new(MANUAL_VALUE, "Manual Selection", EntryKind::Manual),
        ];
        self.selected = Some(DFU_VALUE.to_string());
    }

    /// Drop the firmware-update entry. Returns `false` if there was none.
    pub fn remove_dfu(&mut self) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.kind != EntryKind::Dfu);
        if self.selected.as_deref() == Some(DFU_VALUE) {
            self.selected = self.entries.first().map(|e| e.value.clone());
        }
        self.entries.len() != before
    }

    /// Whether the firmware-update entry is listed.
    pub fn has_dfu(&self) -> bool {
        self.entries.iter().any(|e| e.kind == EntryKind::Dfu)
    }

    /// Select an entry by value. Returns `true` if the selection changed.
    pub fn select(&mut self, value: &str) -> bool {
        if self.entry(value).is_none() || self.selected.as_deref() == Some(value) {
            return false;
        }
        self.selected = Some(value.to_string());
        true
    }

    /// Look up an entry by value.
    pub fn entry(&self, value: &str) -> Option<&PickerEntry> {
        self.entries.iter().find(|e| e.value == value)
    }

    /// All entries in display order.
    pub fn entries(&self) -> &[PickerEntry] {
        &self.entries
    }

    /// Value of the selected entry.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// The selected entry.
    pub fn selected_entry(&self) -> Option<&PickerEntry> {
        self.selected.as_deref().and_then(|value| self.entry(value))
    }

    /// Whether the firmware-update entry is selected.
    pub fn is_dfu_selected(&self) -> bool {
        self.selected_entry()
            .is_some_and(|e| e.kind == EntryKind::Dfu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(ports: &[Endpoint]) -> Vec<&str> {
        ports.iter().map(|p| p.path.as_str()).collect()
    }

    #[test]
    fn test_natural_cmp_numeric_runs() {
        assert_eq!(natural_cmp("COM9", "COM10"), Ordering::Less);
        assert_eq!(natural_cmp("/dev/ttyUSB10", "/dev/ttyUSB2"), Ordering::Greater);
        assert_eq!(natural_cmp("COM3", "com3"), Ordering::Equal);
        assert_eq!(natural_cmp("COM03", "COM3"), Ordering::Equal);
        assert_eq!(natural_cmp("COM", "COM1"), Ordering::Less);
    }

    #[test]
    fn test_sort_ports() {
        let ports = vec![
            Endpoint::new("tcp://10.0.0.1"),
            Endpoint::new("COM10"),
            Endpoint::new("COM2"),
            Endpoint::new("/dev/ttyACM0"),
        ];
        let sorted = sort_ports(ports);
        assert_eq!(paths(&sorted), ["/dev/ttyACM0", "COM2", "COM10", "tcp://10.0.0.1"]);
    }

    #[test]
    fn test_auto_select_windows() {
        let ports = vec![
            Endpoint::new("COM1").with_display_name("Communications Port"),
            Endpoint::new("COM4").with_display_name("Silicon Labs CP210x USB to UART Bridge"),
        ];
        let chosen = auto_select(&ports, OsFamily::Windows).unwrap();
        assert_eq!(chosen.path, "COM4");
    }

    #[test]
    fn test_auto_select_unix_requires_tty() {
        let ports = vec![
            Endpoint::new("/dev/ttyACM0").with_display_name("STM32 Virtual ComPort"),
            Endpoint::new("/dev/cu.usbmodem1").with_display_name("STM32 Virtual ComPort"),
        ];
        let chosen = auto_select(&ports, OsFamily::Unix).unwrap();
        assert_eq!(chosen.path, "/dev/ttyACM0");
    }

    #[test]
    fn test_auto_select_legacy_name_only_on_unix() {
        let ports = vec![Endpoint::new("/dev/tty.usbserial").with_display_name("usbserial")];
        assert!(auto_select(&ports, OsFamily::Unix).is_some());

        let windows = vec![Endpoint::new("COM5").with_display_name("usb serial")];
        assert!(auto_select(&windows, OsFamily::Windows).is_none());
    }

    #[test]
    fn test_auto_select_last_match_wins() {
        let ports = vec![
            Endpoint::new("COM3").with_display_name("STM32"),
            Endpoint::new("COM4").with_display_name("SPRacing F3"),
            Endpoint::new("COM5"),
        ];
        assert_eq!(auto_select(&ports, OsFamily::Windows).unwrap().path, "COM4");
        assert!(auto_select(&[], OsFamily::Windows).is_none());
    }

    #[test]
    fn test_picker_rebuild() {
        let mut picker = PortPicker::new();
        let sorted = picker.rebuild(
            vec![
                Endpoint::new("COM10"),
                Endpoint::new("COM3").with_display_name("STM32"),
            ],
            true,
        );

        assert_eq!(paths(&sorted), ["COM3", "COM10"]);
        let labels: Vec<&str> = picker.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(
            labels,
            ["COM3 - STM32", "COM10", "Virtual Mode (Experimental)", "Manual Selection"]
        );
        assert_eq!(picker.selected(), Some("COM3"));
    }

    #[test]
    fn test_picker_rebuild_keeps_selection() {
        let mut picker = PortPicker::new();
        picker.rebuild(vec![Endpoint::new("COM3"), Endpoint::new("COM4")], false);
        assert!(picker.select("COM4"));
        assert!(!picker.select("COM4"));
        assert!(!picker.select("COM99"));

        picker.rebuild(vec![Endpoint::new("COM4")], false);
        assert_eq!(picker.selected(), Some("COM4"));

        picker.rebuild(Vec::new(), false);
        assert_eq!(picker.selected(), Some(MANUAL_VALUE));
    }

    #[test]
    fn test_picker_dfu_entries() {
        let mut picker = PortPicker::new();
        picker.rebuild(vec![Endpoint::new("COM3")], false);

        picker.show_dfu(Some("STM32 BOOTLOADER"));
        assert!(picker.has_dfu());
        assert!(picker.is_dfu_selected());
        assert_eq!(picker.entries().len(), 2);
        assert_eq!(picker.entries()[0].label, "DFU - STM32 BOOTLOADER");

        assert!(picker.remove_dfu());
        assert!(!picker.has_dfu());
        assert!(!picker.remove_dfu());
        assert_eq!(picker.selected(), Some(MANUAL_VALUE));
    }
}
