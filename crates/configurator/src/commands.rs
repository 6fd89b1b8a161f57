//! Instrument command builders
//!
//! Pure functions producing the command sequences sent to a device. The trigger signal
//! path of every device is `STARt -> DELA8 -> REC`; the master generates the shared
//! acquisition signal with `GEN1` and distributes it through `TSCO1`.

use contracts::{AcquisitionPair, Channel, DeviceSpec};

/// Delay block of the acquisition signal
pub const ACQU_SIGNAL_DELA: &str = "DELA8";

/// Generator of the acquisition signal (master only)
pub const ACQU_SIGNAL_GEN: &str = "GEN1";

/// Time controller distributing the acquisition signal (master only)
pub const ACQU_SIGNAL_TSCO: &str = "TSCO1";

/// Time controller used as histogram reference when none is requested
pub const HIST_NONE_REF_TSCO: &str = "TSCO3";

/// Histogram bin count
pub const HIST_BIN_COUNT: u32 = 16_384;

/// Output pulse width when forwarding the acquisition signal (ps)
pub const FORWARD_PULSE_WIDTH_PS: u64 = 1_000_000;

/// Input resolution preset applied to every device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    High,
    Low,
}

impl Resolution {
    pub fn from_flag(high_resolution: bool) -> Self {
        if high_resolution {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn preset(self) -> &'static str {
        match self {
            Self::High => "HIRES",
            Self::Low => "LOWRES",
        }
    }

    /// Raw timestamp numerator
    pub fn numerator(self) -> u32 {
        match self {
            Self::High => 1,
            Self::Low => 100,
        }
    }
}

/// Time controller fed by an input channel
pub fn input_tsco(channel: u8) -> String {
    format!("TSCO{}", channel + 4)
}

/// `STARt -> DELA8 -> REC` chain, record generator armed manually for one record
pub fn trigger_chain(trigger_delay: u64) -> Vec<String> {
    vec![
        "STARt:ENAB ON;COUP DC;EDGE FALLing;THRE -0.400V;SELE UNSHaped".to_string(),
        format!("{ACQU_SIGNAL_DELA}:VALU 0;LINK STAR"),
        format!(
            "REC:ENAB OFF;TRIG:DELA {trigger_delay};LINK {ACQU_SIGNAL_DELA};ARM:MODE MANU;:REC:ENABle ON;NUM 1"
        ),
    ]
}

/// Master: generator -> TSCO1 -> output 1 and one output per agent, internal clock
pub fn master_distribution(agent_outputs: &[Channel]) -> Vec<String> {
    let mut commands = vec![
        format!("{ACQU_SIGNAL_GEN}:TRIG:LINK NONE;DELA 0;ARM:MODE MANU"),
        format!("{ACQU_SIGNAL_GEN}:ENABle ON;STOP;PWID 1000000;PPER 1004000;PNUM 1"),
        format!("{ACQU_SIGNAL_TSCO}:FIR:LINK {ACQU_SIGNAL_GEN}"),
    ];
    let outputs = agent_outputs
        .iter()
        .map(|c| c.get())
        .chain(std::iter::once(1));
    for output in outputs {
        commands.push(format!("OUTP{output}:ENAB ON;LINK {ACQU_SIGNAL_TSCO}"));
        commands.push(format!("OUTP{output}:PULS OFF"));
    }
    commands.push("DEVIce:SYNC INT".to_string());
    commands
}

/// Agent: forward the delayed acquisition signal to each agent output, external clock
pub fn agent_forwarding(agent_outputs: &[Channel]) -> Vec<String> {
    let mut commands = Vec::with_capacity(agent_outputs.len() * 3 + 1);
    for output in agent_outputs {
        let tsco = format!("TSCO{output}");
        commands.push(format!(
            "{tsco}:FIR:LINK {ACQU_SIGNAL_DELA};:{tsco}:OPIN ONLYFIR;OPOUt ONLYFIR;WIND:ENAB OFF"
        ));
        commands.push(format!("OUTP{output}:ENAB ON;LINK {tsco}"));
        commands.push(format!(
            "OUTP{output}:PULS ON;PULS:WIDT {FORWARD_PULSE_WIDTH_PS}"
        ));
    }
    commands.push("DEVIce:SYNC EXT".to_string());
    commands
}

/// Inputs, then the resolution preset
pub fn inputs(spec: &DeviceSpec, resolution: Resolution) -> Vec<String> {
    let mut commands = Vec::with_capacity(spec.inputs.len() * 3 + 1);
    for (channel, input) in &spec.inputs {
        let channel = channel.get();
        let tsco = input_tsco(channel);
        commands.push(format!(
            "INPU{channel}:ENAB ON;COUP DC;EDGE {};THRE {};SELE {};RESY AUTO",
            input.edge.as_command(),
            input.threshold,
            input.select.as_command()
        ));
        commands.push(format!("DELA{channel}:VALU {};LINK INPU{channel}", input.delay));
        commands.push(format!(
            "{tsco}:FIR:LINK DELA{channel};:{tsco}:OPIN ONLYFIR;OPOUt ONLYFIR;WIND:ENAB OFF"
        ));
    }
    commands.push(format!("DEVIce:RESolution {}", resolution.preset()));
    commands
}

/// Histogram acquisitions
pub fn histograms(spec: &DeviceSpec) -> Vec<String> {
    let Some(config) = spec.histograms.as_ref() else {
        return Vec::new();
    };
    let mut commands = Vec::new();
    if config.acquisitions.iter().any(|p| p.reference == 0) {
        commands.push(format!(
            "{HIST_NONE_REF_TSCO}:FIR:LINK REC;:{HIST_NONE_REF_TSCO}:OPIN ONLYFIR;OPOUt ONLYFIR;WIND:ENAB OFF"
        ));
    }
    for (index, pair) in spec.histogram_acquisitions() {
        let reference = reference_tsco(&pair).unwrap_or_else(|| HIST_NONE_REF_TSCO.to_string());
        commands.push(format!(
            "HIST{index}:MIN 0;BWID {};BCOUnt {HIST_BIN_COUNT};REF:LINK {reference};:HIST{index}:STOP:LINK {}",
            config.bin_width,
            input_tsco(pair.stop)
        ));
    }
    commands
}

/// Raw timestamp acquisitions, streaming disabled
pub fn timestamps(spec: &DeviceSpec, resolution: Resolution) -> Vec<String> {
    spec.raw_acquisitions()
        .map(|(index, pair)| {
            let reference = reference_tsco(&pair).unwrap_or_else(|| "NONE".to_string());
            format!(
                "RAW{index}:SEND OFF;NUMErator {};DENOminator 1;REF:LINK {reference};:RAW{index}:STOP:LINK {}",
                resolution.numerator(),
                input_tsco(pair.stop)
            )
        })
        .collect()
}

fn reference_tsco(pair: &AcquisitionPair) -> Option<String> {
    pair.reference_channel().map(|c| input_tsco(c.get()))
}

/// Measurement channels of a device: inputs, histograms, raw timestamps
pub fn acquisitions(spec: &DeviceSpec, resolution: Resolution) -> Vec<String> {
    let mut commands = inputs(spec, resolution);
    commands.extend(histograms(spec));
    commands.extend(timestamps(spec, resolution));
    commands
}

/// Record generator repeating sub-acquisitions of `pwid` every `pper` (ps)
pub fn sub_acquisition_timer(pwid: u64, pper: u64) -> Vec<String> {
    vec![
        "REC:TRIG:ARM:MODE MANUal".to_string(),
        "REC:ENABle ON".to_string(),
        "REC:STOP".to_string(),
        "REC:NUM INF".to_string(),
        format!("REC:PWID {pwid};PPER {pper}"),
    ]
}

/// Raw channel without reference, timestamps relative to the sub-acquisition start
pub fn referenceless_raw(channel: u8) -> String {
    format!("RAW{channel}:REF:LINK NONE")
}

/// Internal generators feeding each channel with dummy events
pub fn demo_generators(channels: &[u8]) -> Vec<String> {
    let mut commands = Vec::new();
    for &c in channels {
        commands.push(format!(
            "GEN{c}:ENAB ON;PPER 10000000;PWID 20000;PNUM INF;PLAY;TRIG:LINK NONE"
        ));
        commands.push(format!("TSCO{c}:FIR:LINK GEN{c}"));
        commands.push(format!("TSCO{c}:OPIN ONLYFIR;OPOU ONLYFIR;WIND:ENAB OFF"));
        commands.push(format!(
            "TSCO{c}:WIND:BEGI:LINK NONE;:TSCO{c}:WIND:END:LINK NONE"
        ));
        commands.push(format!("RAW{c}:STOP:LINK TSCO{c};:RAW{c}:REF:LINK NONE"));
    }
    commands
}
