use core::fmt::Display;
use hashbrown::HashMap;

/// Modeled cycles accumulated per kind of work over one run.
#[derive(Debug, Default)]
pub(crate) struct CycleProfile {
    entries: HashMap<String, ProfileItem>,
}

#[derive(Debug, Default, Clone)]
struct ProfileItem {
    total_cycles: f64,
    num_recorded: usize,
}

impl CycleProfile {
    /// If any work was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn update(&mut self, name: &str, cycles: f64) {
        if let Some(item) = self.entries.get_mut(name) {
            item.total_cycles += cycles;
            item.num_recorded += 1;
        } else {
            self.entries.insert(
                name.to_string(),
                ProfileItem {
                    total_cycles: cycles,
                    num_recorded: 1,
                },
            );
        }
    }
}

impl Display for CycleProfile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let header_name = "Name";
        let header_cycles = "Cycles";
        let header_count = "Count";
        let header_ratio = "Ratio";

        let mut name_len = header_name.len();
        let mut cycles_len = header_cycles.len();
        let mut count_len = header_count.len();
        let mut ratio_len = header_ratio.len();

        let mut total_cycles = 0.0;
        let mut total_count = 0;

        let mut items: Vec<(String, String, String, f64)> = self
            .entries
            .iter()
            .map(|(key, item)| {
                let name = key.clone();
                let cycles = format!("{:.0}", item.total_cycles);
                let count = format!("{}", item.num_recorded);

                name_len = usize::max(name_len, name.len());
                cycles_len = usize::max(cycles_len, cycles.len());
                count_len = usize::max(count_len, count.len());

                total_cycles += item.total_cycles;
                total_count += item.num_recorded;

                (name, cycles, count, item.total_cycles)
            })
            .collect();

        let total_cycles_fmt = format!("{total_cycles:.0}");
        let total_count_fmt = format!("{total_count}");
        let total_ratio_fmt = "100 %";

        cycles_len = usize::max(cycles_len, total_cycles_fmt.len());
        count_len = usize::max(count_len, total_count_fmt.len());
        ratio_len = usize::max(ratio_len, total_ratio_fmt.len());

        let line_length = name_len + cycles_len + count_len + ratio_len + 11;

        let write_line = |char: &str, f: &mut core::fmt::Formatter<'_>| {
            writeln!(f, "|{}|", char.repeat(line_length))
        };
        items.sort_by(|(_, _, _, a), (_, _, _, b)| b.total_cmp(a));

        write_line("⎺", f)?;

        writeln!(
            f,
            "| {header_name:<name_len$} | {header_cycles:<cycles_len$} | {header_count:<count_len$} | {header_ratio:<ratio_len$} |",
        )?;

        write_line("⎼", f)?;

        for (name, cycles, count, part) in items {
            let ratio = if total_cycles > 0.0 {
                (100.0 * part / total_cycles).round() as u64
            } else {
                0
            };

            writeln!(
                f,
                "| {:<width_name$} | {:<width_cycles$} | {:<width_count$} | {:<width_ratio$} |",
                name,
                cycles,
                count,
                format!("{ratio} %"),
                width_name = name_len,
                width_cycles = cycles_len,
                width_count = count_len,
                width_ratio = ratio_len,
            )?;
        }

        write_line("⎼", f)?;

        writeln!(
            f,
            "| {:<width_name$} | {:<width_cycles$} | {:<width_count$} | {:<width_ratio$} |",
            "Total",
            total_cycles_fmt,
            total_count_fmt,
            total_ratio_fmt,
            width_name = name_len,
            width_cycles = cycles_len,
            width_count = count_len,
            width_ratio = ratio_len,
        )?;

        write_line("⎯", f)
    }
}
