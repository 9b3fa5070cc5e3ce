use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// One numeric value recorded from a line of an input or output file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub line_index: usize,
    /// Source line without its terminator.
    pub raw_text: String,
    pub value: Option<f64>,
    pub error: Option<f64>,
    pub refined: bool,
    pub fixed: bool,
    /// TOPAS parameter name, without any `!` prefix.
    pub name: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Byte offset of the value literal.
    pub column: Option<usize>,
    pub literal: Option<String>,
    pub error_literal: Option<String>,
    /// Byte offset of the `@` marker.
    pub marker_column: Option<usize>,
    /// Byte offset of the name token (the `!` when present).
    pub name_column: Option<usize>,
    #[serde(default)]
    pub frozen: bool,
}

impl ParameterEntry {
    pub fn new(line_index: usize, raw_text: &str) -> Self {
        Self {
            line_index,
            raw_text: raw_text.to_string(),
            ..Default::default()
        }
    }

    /// Byte offset just past the literal and its error suffix.
    pub fn value_end(&self) -> Option<usize> {
        let column = self.column?;
        let mut end = column + self.literal.as_ref()?.len();
        if let Some(err) = &self.error_literal {
            end += super::tokens::ERROR_SUFFIX.len() + err.len();
        }
        Some(end)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum PhaseKind {
    #[strum(serialize = "str")]
    StrPhase,
    #[strum(serialize = "hkl_Is")]
    HklIsPhase,
    #[strum(serialize = "xo_Is")]
    XoIsPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occupancy {
    pub element: String,
    pub entry: ParameterEntry,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SiteEntry {
    pub label: String,
    pub element: String,
    pub index: Option<u32>,
    pub line_index: usize,
    pub x: Option<ParameterEntry>,
    pub y: Option<ParameterEntry>,
    pub z: Option<ParameterEntry>,
    /// Mixed sites carry one entry per element, in discovery order.
    pub occupancies: Vec<Occupancy>,
    pub b_value: Option<ParameterEntry>,
}

impl SiteEntry {
    pub fn occupancy(&self, element: &str) -> Option<f64> {
        self.occupancies
            .iter()
            .find(|o| o.element == element)
            .and_then(|o| o.entry.value)
    }

    pub fn total_occupancy(&self) -> f64 {
        self.occupancies.iter().filter_map(|o| o.entry.value).sum()
    }

    pub fn field(&self, field: SiteField) -> Option<&ParameterEntry> {
        match field {
            SiteField::X => self.x.as_ref(),
            SiteField::Y => self.y.as_ref(),
            SiteField::Z => self.z.as_ref(),
            SiteField::BValue => self.b_value.as_ref(),
        }
    }

    pub fn field_mut(&mut self, field: SiteField) -> Option<&mut ParameterEntry> {
        match field {
            SiteField::X => self.x.as_mut(),
            SiteField::Y => self.y.as_mut(),
            SiteField::Z => self.z.as_mut(),
            SiteField::BValue => self.b_value.as_mut(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.x
            .iter()
            .chain(self.y.iter())
            .chain(self.z.iter())
            .chain(self.occupancies.iter().map(|o| &o.entry))
            .chain(self.b_value.iter())
    }

    fn entries_mut(&mut self) -> impl Iterator<Item = &mut ParameterEntry> {
        self.x
            .iter_mut()
            .chain(self.y.iter_mut())
            .chain(self.z.iter_mut())
            .chain(self.occupancies.iter_mut().map(|o| &mut o.entry))
            .chain(self.b_value.iter_mut())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum SiteField {
    X,
    Y,
    Z,
    #[strum(serialize = "beq")]
    BValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBlock {
    pub id: usize,
    pub kind: PhaseKind,
    pub name: Option<String>,
    pub space_group: Option<String>,
    pub start_line: usize,
    pub end_line: Option<usize>,
    pub parameters: BTreeMap<String, ParameterEntry>,
    pub sites: BTreeMap<String, SiteEntry>,
    #[serde(default)]
    pub frozen: bool,
}

impl PhaseBlock {
    pub fn new(id: usize, kind: PhaseKind, start_line: usize) -> Self {
        Self {
            id,
            kind,
            name: None,
            space_group: None,
            start_line,
            end_line: None,
            parameters: BTreeMap::new(),
            sites: BTreeMap::new(),
            frozen: false,
        }
    }

    pub fn scale(&self) -> Option<&ParameterEntry> {
        self.parameters.get("scale")
    }

    /// Name used to match monitors: the scale parameter name, else the phase name.
    pub fn scale_name(&self) -> Option<&str> {
        self.scale()
            .and_then(|s| s.name.as_deref())
            .or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BackgroundBlock {
    pub line_index: usize,
    pub refined: bool,
    pub terms: Vec<ParameterEntry>,
}

/// The `Out_X_Yobs_Ycalc_Ydiff("<prefix>_<temp>_<method>.xy")` directive.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputName {
    pub line_index: usize,
    /// Byte offset of the stem inside the line.
    pub column: usize,
    pub prefix: String,
    pub temp: String,
    pub method: String,
    pub extension: String,
    #[serde(default)]
    pub frozen: bool,
}

impl OutputName {
    pub fn stem(&self) -> String {
        match (self.temp.is_empty(), self.method.is_empty()) {
            (true, true) => self.prefix.clone(),
            (false, true) => format!("{}_{}", self.prefix, self.temp),
            _ => format!("{}_{}_{}", self.prefix, self.temp, self.method),
        }
    }
}

/// The `xdd "<file>"` pattern reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatternRef {
    pub line_index: usize,
    pub column: usize,
    pub filename: String,
    #[serde(default)]
    pub frozen: bool,
}

impl PatternRef {
    pub fn file_name(&self) -> &str {
        self.filename
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.filename)
    }
}

/// Every `<key> <number>` pair on the line reporting `r_wp`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FitMetrics {
    pub line_index: usize,
    pub values: BTreeMap<String, f64>,
}

impl FitMetrics {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Stable address of one entry inside a [`StructuredModel`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamKey {
    Phase { phase: usize, name: String },
    Site { phase: usize, label: String, field: SiteField },
    Occupancy { phase: usize, label: String, element: String },
    Background { term: usize },
    SpecimenDisplacement,
    Scale,
    Global(String),
}

impl ParamKey {
    pub fn phase(phase: usize, name: impl Into<String>) -> Self {
        Self::Phase {
            phase,
            name: name.into(),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phase { phase, name } => write!(f, "phase[{}].{}", phase, name),
            Self::Site { phase, label, field } => write!(f, "phase[{}].{}.{}", phase, label, field),
            Self::Occupancy {
                phase,
                label,
                element,
            } => write!(f, "phase[{}].{}.occ({})", phase, label, element),
            Self::Background { term } => write!(f, "bkg[{}]", term),
            Self::SpecimenDisplacement => write!(f, "Specimen_Displacement"),
            Self::Scale => write!(f, "scale"),
            Self::Global(name) => write!(f, "{}", name),
        }
    }
}

/// What [`StructuredModel::freeze`] pins in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeTarget {
    Entry(ParamKey),
    Phase(usize),
    Output,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuredModel {
    pub phases: Vec<PhaseBlock>,
    pub background: Option<BackgroundBlock>,
    pub specimen_displacement: Option<ParameterEntry>,
    pub output: Option<OutputName>,
    pub xdd: Option<PatternRef>,
    pub scale: Option<ParameterEntry>,
    pub fit: Option<FitMetrics>,
    pub globals: BTreeMap<String, ParameterEntry>,
}

impl StructuredModel {
    pub fn r_wp(&self) -> Option<f64> {
        self.fit.as_ref().and_then(|f| f.get("r_wp"))
    }

    pub fn r_exp(&self) -> Option<f64> {
        self.fit.as_ref().and_then(|f| f.get("r_exp"))
    }

    pub fn gof(&self) -> Option<f64> {
        self.fit.as_ref().and_then(|f| f.get("gof"))
    }

    pub fn phase(&self, id: usize) -> Option<&PhaseBlock> {
        self.phases.get(id)
    }

    pub fn entry(&self, key: &ParamKey) -> Option<&ParameterEntry> {
        match key {
            ParamKey::Phase { phase, name } => self.phases.get(*phase)?.parameters.get(name),
            ParamKey::Site {
                phase,
                label,
                field,
            } => self.phases.get(*phase)?.sites.get(label)?.field(*field),
            ParamKey::Occupancy {
                phase,
                label,
                element,
            } => self
                .phases
                .get(*phase)?
                .sites
                .get(label)?
                .occupancies
                .iter()
                .find(|o| &o.element == element)
                .map(|o| &o.entry),
            ParamKey::Background { term } => self.background.as_ref()?.terms.get(*term),
            ParamKey::SpecimenDisplacement => self.specimen_displacement.as_ref(),
            ParamKey::Scale => self.scale.as_ref(),
            ParamKey::Global(name) => self.globals.get(name),
        }
    }

    pub fn entry_mut(&mut self, key: &ParamKey) -> Option<&mut ParameterEntry> {
        match key {
            ParamKey::Phase { phase, name } => {
                self.phases.get_mut(*phase)?.parameters.get_mut(name)
            }
            ParamKey::Site {
                phase,
                label,
                field,
            } => self
                .phases
                .get_mut(*phase)?
                .sites
                .get_mut(label)?
                .field_mut(*field),
            ParamKey::Occupancy {
                phase,
                label,
                element,
            } => self
                .phases
                .get_mut(*phase)?
                .sites
                .get_mut(label)?
                .occupancies
                .iter_mut()
                .find(|o| &o.element == element)
                .map(|o| &mut o.entry),
            ParamKey::Background { term } => self.background.as_mut()?.terms.get_mut(*term),
            ParamKey::SpecimenDisplacement => self.specimen_displacement.as_mut(),
            ParamKey::Scale => self.scale.as_mut(),
            ParamKey::Global(name) => self.globals.get_mut(name),
        }
    }

    /// Keys of every recorded entry, phases first.
    pub fn keys(&self) -> Vec<ParamKey> {
        let mut keys = Vec::new();
        for phase in &self.phases {
            for name in phase.parameters.keys() {
                keys.push(ParamKey::phase(phase.id, name.clone()));
            }
            for (label, site) in &phase.sites {
                for field in SiteField::iter() {
                    if site.field(field).is_some() {
                        keys.push(ParamKey::Site {
                            phase: phase.id,
                            label: label.clone(),
                            field,
                        });
                    }
                }
                for occ in &site.occupancies {
                    keys.push(ParamKey::Occupancy {
                        phase: phase.id,
                        label: label.clone(),
                        element: occ.element.clone(),
                    });
                }
            }
        }
        if let Some(bkg) = &self.background {
            keys.extend((0..bkg.terms.len()).map(|term| ParamKey::Background { term }));
        }
        if self.specimen_displacement.is_some() {
            keys.push(ParamKey::SpecimenDisplacement);
        }
        if self.scale.is_some() {
            keys.push(ParamKey::Scale);
        }
        keys.extend(self.globals.keys().cloned().map(ParamKey::Global));
        keys
    }

    pub fn entries(&self) -> Vec<&ParameterEntry> {
        let mut out: Vec<&ParameterEntry> = Vec::new();
        for phase in &self.phases {
            out.extend(phase.parameters.values());
            for site in phase.sites.values() {
                out.extend(site.entries());
            }
        }
        if let Some(bkg) = &self.background {
            out.extend(bkg.terms.iter());
        }
        out.extend(self.specimen_displacement.iter());
        out.extend(self.scale.iter());
        out.extend(self.globals.values());
        out
    }

    pub fn entries_mut(&mut self) -> Vec<&mut ParameterEntry> {
        let mut out: Vec<&mut ParameterEntry> = Vec::new();
        for phase in &mut self.phases {
            out.extend(phase.parameters.values_mut());
            for site in phase.sites.values_mut() {
                out.extend(site.entries_mut());
            }
        }
        if let Some(bkg) = &mut self.background {
            out.extend(bkg.terms.iter_mut());
        }
        out.extend(self.specimen_displacement.iter_mut());
        out.extend(self.scale.iter_mut());
        out.extend(self.globals.values_mut());
        out
    }

    /// Entries recorded on one line, in model order.
    pub fn entries_on_line_mut(&mut self, line_index: usize) -> Vec<&mut ParameterEntry> {
        self.entries_mut()
            .into_iter()
            .filter(|e| e.line_index == line_index)
            .collect()
    }

    pub fn freeze(&mut self, target: FreezeTarget) {
        match target {
            FreezeTarget::Entry(key) => {
                if let Some(entry) = self.entry_mut(&key) {
                    entry.frozen = true;
                }
            }
            FreezeTarget::Phase(id) => {
                if let Some(phase) = self.phases.get_mut(id) {
                    phase.frozen = true;
                    phase.parameters.values_mut().for_each(|e| e.frozen = true);
                    for site in phase.sites.values_mut() {
                        site.entries_mut().for_each(|e| e.frozen = true);
                    }
                }
            }
            FreezeTarget::Output => {
                if let Some(out) = &mut self.output {
                    out.frozen = true;
                }
            }
            FreezeTarget::Pattern => {
                if let Some(xdd) = &mut self.xdd {
                    xdd.frozen = true;
                }
            }
        }
    }

    /// Post-condition of an insertion of `offset` lines at `at`: every
    /// non-frozen position at or after `at` moves down by `offset`.
    pub fn shift_lines(&mut self, at: usize, offset: usize) {
        let bump = |idx: &mut usize| {
            if *idx >= at {
                *idx += offset;
            }
        };

        for entry in self.entries_mut() {
            if !entry.frozen {
                bump(&mut entry.line_index);
            }
        }
        for phase in &mut self.phases {
            if phase.frozen {
                continue;
            }
            bump(&mut phase.start_line);
            if let Some(end) = &mut phase.end_line {
                bump(end);
            }
            for site in phase.sites.values_mut() {
                bump(&mut site.line_index);
            }
        }
        if let Some(bkg) = &mut self.background {
            bump(&mut bkg.line_index);
        }
        if let Some(out) = self.output.as_mut().filter(|o| !o.frozen) {
            bump(&mut out.line_index);
        }
        if let Some(xdd) = self.xdd.as_mut().filter(|x| !x.frozen) {
            bump(&mut xdd.line_index);
        }
        if let Some(fit) = &mut self.fit {
            bump(&mut fit.line_index);
        }
    }
}
