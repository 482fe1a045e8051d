use std::{thread, time::Duration};

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::warn;

use fan_common::{api::IrDiagnostics, nec, FanAction, IrCodeSet, IrHardwareConfig};

use crate::esp::monotonic_ms;

// 80 MHz APB / 80 = 1 µs per tick, so NEC timings go in unscaled.
const IR_TICK_DIVIDER: u8 = 80;
const IR_REPEAT_GAP_MS: u64 = 50;
const MIN_SEND_INTERVAL_MS: u64 = 300;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    backend: IrBackend,
    codes: IrCodeSet,
    carrier_khz: u32,
    repeat_count: u8,
    last_send_ms: Option<u64>,
    sent_frames: u64,
    failed_actions: u64,
    last_error: Option<String>,
}

impl IrTransmitter {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        hardware: &IrHardwareConfig,
        codes: IrCodeSet,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(hardware.carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
            codes,
            carrier_khz: hardware.carrier_khz,
            repeat_count: hardware.repeat_count,
            last_send_ms: None,
            sent_frames: 0,
            failed_actions: 0,
            last_error: None,
        })
    }

    pub fn disabled(hardware: &IrHardwareConfig, codes: IrCodeSet) -> Self {
        Self {
            backend: IrBackend::Disabled,
            codes,
            carrier_khz: hardware.carrier_khz,
            repeat_count: hardware.repeat_count,
            last_send_ms: None,
            sent_frames: 0,
            failed_actions: 0,
            last_error: None,
        }
    }

    pub fn execute_action(&mut self, action: FanAction) -> anyhow::Result<()> {
        let result = match action {
            FanAction::Send(code) => {
                let raw = nec::encode(self.codes.value(code));
                self.send_raw(&raw)
                    .with_context(|| format!("failed to send {} code", code.as_str()))
            }
        };

        if let Err(err) = &result {
            self.failed_actions = self.failed_actions.saturating_add(1);
            self.last_error = Some(format!("{err:#}"));
        } else {
            self.last_error = None;
        }

        result
    }

    pub fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: matches!(self.backend, IrBackend::Rmt(_)),
            carrier_khz: self.carrier_khz,
            repeat_count: self.repeat_count,
            repeat_gap_ms: IR_REPEAT_GAP_MS,
            min_send_interval_ms: MIN_SEND_INTERVAL_MS,
            last_send_ms: self.last_send_ms,
            sent_frames: self.sent_frames,
            failed_actions: self.failed_actions,
            last_error: self.last_error.clone(),
        }
    }

    fn send_raw(&mut self, raw: &[u16]) -> anyhow::Result<()> {
        if raw.is_empty() {
            return Ok(());
        }

        if matches!(self.backend, IrBackend::Disabled) {
            warn!("IR disabled, dropping frame with {} timings", raw.len());
            return Ok(());
        }

        self.rate_limit();

        let mut pulses = Vec::with_capacity(raw.len());
        for (index, duration) in raw.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };

            pulses.push(Pulse::new(
                level,
                PulseTicks::new(*duration).context("invalid IR pulse duration")?,
            ));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .context("failed to convert IR timings to RMT signal")?;

        let repeats = usize::from(self.repeat_count.max(1));
        if let IrBackend::Rmt(tx) = &mut self.backend {
            for repeat in 0..repeats {
                tx.start_blocking(&signal)
                    .context("failed to transmit IR frame over RMT")?;
                if repeat + 1 < repeats {
                    thread::sleep(Duration::from_millis(IR_REPEAT_GAP_MS));
                }
            }
        }

        self.last_send_ms = Some(monotonic_ms());
        self.sent_frames = self.sent_frames.saturating_add(1);
        Ok(())
    }

    fn rate_limit(&mut self) {
        let now = monotonic_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < MIN_SEND_INTERVAL_MS {
                thread::sleep(Duration::from_millis(MIN_SEND_INTERVAL_MS - elapsed));
            }
        }
    }
}
