// audio processing unit
//
// two square channels (the first one with a frequency sweep), one wave channel and one
// noise channel, mixed into interleaved stereo i16 samples at the requested output rate.
// the frame sequencer is not clocked here, the timer calls `clock_frame_sequencer` on the
// falling edge of DIV bit 4 (512 Hz).

use log::debug;

use crate::util::is_set;

use std::ops::RangeInclusive;

const CPU_CLOCK: u32 = 4_194_304;

/// Output rates the sample clock supports.
pub const SAMPLE_RATES: RangeInclusive<u32> = 8_000..=192_000;

// each channel contributes -15..=15, four channels at master volume 8 peak at 480
const MIXER_GAIN: i32 = 64;

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [0, 0, 0, 0, 0, 0, 1, 1], // 25%
    [0, 0, 0, 0, 1, 1, 1, 1], // 50%
    [1, 1, 1, 1, 1, 1, 0, 0], // 75%
];

const NOISE_DIVISORS: [u32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];
const NOISE_SHIFT_STOP: u8 = 14;

// bits that always read back as 1, indexed from 0xFF10 (NR10) to 0xFF26 (NR52)
const READ_MASKS: [u8; 0x17] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, // NR10-NR14
    0xFF, 0x3F, 0x00, 0xFF, 0xBF, // NR20-NR24
    0x7F, 0xFF, 0x9F, 0xFF, 0xBF, // NR30-NR34
    0xFF, 0xFF, 0x00, 0x00, 0xBF, // NR40-NR44
    0x00, 0x00, 0x70, // NR50-NR52
];

pub struct Apu {
    enabled: bool, // master power
    nr50: u8,      // master volume register
    nr51: u8,      // sound panning register
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,

    frame_sequencer_step: u8,

    sample_rate: u32,
    sample_clock: u32,
    samples: Vec<i16>, // interleaved left/right
}

impl Apu {
    /// Rates outside `SAMPLE_RATES` are clamped into it.
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.clamp(*SAMPLE_RATES.start(), *SAMPLE_RATES.end());
        Self {
            enabled: false,
            nr50: 0x00,
            nr51: 0x00,
            ch1: SquareChannel::new(),
            ch2: SquareChannel::new(),
            ch3: WaveChannel::new(),
            ch4: NoiseChannel::new(),
            frame_sequencer_step: 0,
            sample_rate,
            sample_clock: 0,
            samples: Vec::with_capacity((sample_rate as usize / 60 + 1) * 2),
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        let raw = match addr {
            0xFF10..=0xFF14 => self.ch1.read((addr - 0xFF10) as usize),
            0xFF15..=0xFF19 => self.ch2.read((addr - 0xFF15) as usize),
            0xFF1A..=0xFF1E => self.ch3.read((addr - 0xFF1A) as usize),
            0xFF1F..=0xFF23 => self.ch4.read((addr - 0xFF1F) as usize),
            0xFF24 => self.nr50,
            0xFF25 => self.nr51,
            0xFF26 => {
                ((self.enabled as u8) << 7)
                    | ((self.ch4.playing as u8) << 3)
                    | ((self.ch3.playing as u8) << 2)
                    | ((self.ch2.playing as u8) << 1)
                    | (self.ch1.playing as u8)
            }
            0xFF30..=0xFF3F => return self.ch3.wave_ram[(addr - 0xFF30) as usize],
            _ => return 0xFF,
        };

        raw | READ_MASKS[(addr - 0xFF10) as usize]
    }

    pub fn write_byte(&mut self, addr: u16, value: u8) {
        // wave RAM stays accessible whatever the power state
        if let 0xFF30..=0xFF3F = addr {
            self.ch3.wave_ram[(addr - 0xFF30) as usize] = value;
            return;
        }

        if addr == 0xFF26 {
            self.write_power(value);
            return;
        }

        if !self.enabled {
            return;
        }

        match addr {
            0xFF10..=0xFF14 => self.ch1.write((addr - 0xFF10) as usize, value),
            // NR20 does not exist
            0xFF16..=0xFF19 => self.ch2.write((addr - 0xFF15) as usize, value),
            0xFF1A..=0xFF1E => self.ch3.write((addr - 0xFF1A) as usize, value),
            0xFF20..=0xFF23 => self.ch4.write((addr - 0xFF1F) as usize, value),
            0xFF24 => self.nr50 = value,
            0xFF25 => self.nr51 = value,
            _ => {}
        }
    }

    fn write_power(&mut self, value: u8) {
        let on = is_set(value, 7);
        if on == self.enabled {
            return;
        }

        if on {
            debug!("APU powered on");
            self.enabled = true;
            self.frame_sequencer_step = 0;
        } else {
            debug!("APU powered off");
            // every register but wave RAM is cleared
            let wave_ram = self.ch3.wave_ram;
            self.ch1 = SquareChannel::new();
            self.ch2 = SquareChannel::new();
            self.ch3 = WaveChannel::new();
            self.ch3.wave_ram = wave_ram;
            self.ch4 = NoiseChannel::new();
            self.nr50 = 0;
            self.nr51 = 0;
            self.enabled = false;
        }
    }

    /// Clocked at 512 Hz by the timer.
    pub fn clock_frame_sequencer(&mut self) {
        if !self.enabled {
            return;
        }

        let step = self.frame_sequencer_step;
        if step % 2 == 0 {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if step == 2 || step == 6 {
            self.ch1.clock_sweep();
        }
        if step == 7 {
            self.ch1.clock_envelope();
            self.ch2.clock_envelope();
            self.ch4.clock_envelope();
        }

        self.frame_sequencer_step = (step + 1) & 7;
    }

    /// Advances every channel by `cycles` clock cycles and emits a sample pair
    /// each time a full output sample period has elapsed.
    pub fn update(&mut self, cycles: u32) {
        self.ch1.check_dac();
        self.ch2.check_dac();
        self.ch3.check_dac();
        self.ch4.check_dac();

        for _ in 0..cycles {
            if self.enabled {
                self.ch1.tick();
                self.ch2.tick();
                self.ch3.tick();
                self.ch4.tick();
            }

            self.sample_clock += self.sample_rate;
            if self.sample_clock >= CPU_CLOCK {
                self.sample_clock -= CPU_CLOCK;
                let (left, right) = self.mix();
                self.samples.push(left);
                self.samples.push(right);
            }
        }
    }

    /// Hands over every sample produced since the last call, interleaved left/right.
    pub fn end_frame(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.samples)
    }

    fn mix(&self) -> (i16, i16) {
        if !self.enabled {
            return (0, 0);
        }

        let outputs = [
            dac(self.ch1.playing, self.ch1.output()),
            dac(self.ch2.playing, self.ch2.output()),
            dac(self.ch3.playing, self.ch3.output()),
            dac(self.ch4.playing, self.ch4.output()),
        ];

        let mut left = 0;
        let mut right = 0;
        for (i, out) in outputs.iter().enumerate() {
            if is_set(self.nr51, i as u8 + 4) {
                left += out;
            }
            if is_set(self.nr51, i as u8) {
                right += out;
            }
        }

        let left_volume = ((self.nr50 >> 4) & 0x07) as i32 + 1;
        let right_volume = (self.nr50 & 0x07) as i32 + 1;

        (
            (left * left_volume * MIXER_GAIN) as i16,
            (right * right_volume * MIXER_GAIN) as i16,
        )
    }
}

// converts a 0-15 channel amplitude to a signed level
fn dac(playing: bool, amplitude: u8) -> i32 {
    if playing {
        amplitude as i32 * 2 - 15
    } else {
        0
    }
}

// NRx1 length counter, 64 steps for square and noise, 256 for wave
struct LengthCounter {
    enabled: bool,
    timer: u16,
    max: u16,
}

impl LengthCounter {
    fn new(max: u16) -> Self {
        Self {
            enabled: false,
            timer: 0,
            max,
        }
    }

    fn load(&mut self, length: u8) {
        self.timer = self.max - length as u16;
    }

    fn trigger(&mut self) {
        if self.timer == 0 {
            self.timer = self.max;
        }
    }

    // true when the counter just ran out
    fn clock(&mut self) -> bool {
        if self.enabled && self.timer > 0 {
            self.timer -= 1;
            return self.timer == 0;
        }
        false
    }
}

// NRx2 volume envelope
struct Envelope {
    register: u8,
    volume: u8,
    timer: u8,
}

impl Envelope {
    fn new() -> Self {
        Self {
            register: 0,
            volume: 0,
            timer: 0,
        }
    }

    fn initial_volume(&self) -> u8 {
        self.register >> 4
    }

    fn increasing(&self) -> bool {
        is_set(self.register, 3)
    }

    fn period(&self) -> u8 {
        self.register & 0x07
    }

    fn dac_enabled(&self) -> bool {
        self.initial_volume() != 0 || self.increasing()
    }

    fn trigger(&mut self) {
        self.timer = self.period();
        self.volume = self.initial_volume();
    }

    fn clock(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer != 0 || self.period() == 0 {
            return;
        }

        self.timer = self.period();
        if self.increasing() {
            if self.volume < 15 {
                self.volume += 1;
            }
        } else if self.volume > 0 {
            self.volume -= 1;
        }
    }
}

struct SquareChannel {
    sweep: u8, // NR10, always 0 on channel 2
    duty: u8,
    length: LengthCounter,
    envelope: Envelope,
    frequency: u16, // 11 bits, NRx3 + low 3 bits of NRx4

    playing: bool,
    freq_timer: u32,
    duty_position: u8,

    sweep_timer: u8,
    sweep_enabled: bool,
    shadow_freq: u16, // internal copy of frequency used for sweep calculations
}

impl SquareChannel {
    fn new() -> Self {
        Self {
            sweep: 0,
            duty: 0,
            length: LengthCounter::new(64),
            envelope: Envelope::new(),
            frequency: 0,
            playing: false,
            freq_timer: 0,
            duty_position: 0,
            sweep_timer: 0,
            sweep_enabled: false,
            shadow_freq: 0,
        }
    }

    fn read(&self, reg: usize) -> u8 {
        match reg {
            0 => self.sweep,
            1 => self.duty << 6,
            2 => self.envelope.register,
            4 => (self.length.enabled as u8) << 6,
            _ => 0, // NRx3 is write-only
        }
    }

    fn write(&mut self, reg: usize, value: u8) {
        match reg {
            0 => self.sweep = value & 0x7F,
            1 => {
                self.duty = value >> 6;
                self.length.load(value & 0x3F);
            }
            2 => self.envelope.register = value,
            3 => self.frequency = (self.frequency & 0x700) | value as u16,
            4 => {
                self.frequency = (self.frequency & 0xFF) | ((value & 0x07) as u16) << 8;
                self.length.enabled = is_set(value, 6);
                if is_set(value, 7) {
                    self.trigger();
                }
            }
            _ => {}
        }
    }

    fn sweep_period(&self) -> u8 {
        (self.sweep >> 4) & 0x07
    }

    fn sweep_negate(&self) -> bool {
        is_set(self.sweep, 3)
    }

    fn sweep_shift(&self) -> u8 {
        self.sweep & 0x07
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 4
    }

    fn trigger(&mut self) {
        self.playing = true;
        self.length.trigger();
        self.envelope.trigger();
        self.freq_timer = self.period();

        self.shadow_freq = self.frequency;
        self.sweep_timer = self.reload_sweep_timer();
        self.sweep_enabled = self.sweep_period() != 0 || self.sweep_shift() != 0;
        if self.sweep_shift() != 0 {
            // overflow check only, the new frequency is not committed
            self.next_sweep_frequency();
        }

        self.check_dac();
    }

    fn check_dac(&mut self) {
        if !self.envelope.dac_enabled() {
            self.playing = false;
        }
    }

    fn tick(&mut self) {
        if !self.playing {
            return;
        }

        if self.freq_timer > 0 {
            self.freq_timer -= 1;
        }
        if self.freq_timer == 0 {
            self.freq_timer = self.period();
            self.duty_position = (self.duty_position + 1) & 7;
        }
    }

    fn output(&self) -> u8 {
        DUTY_TABLE[self.duty as usize][self.duty_position as usize] * self.envelope.volume
    }

    fn clock_length(&mut self) {
        if self.length.clock() {
            self.playing = false;
        }
    }

    fn clock_envelope(&mut self) {
        if self.playing {
            self.envelope.clock();
        }
    }

    fn clock_sweep(&mut self) {
        if !self.playing {
            return;
        }

        if self.sweep_timer > 0 {
            self.sweep_timer -= 1;
        }
        if self.sweep_timer != 0 {
            return;
        }

        self.sweep_timer = self.reload_sweep_timer();
        if !self.sweep_enabled || self.sweep_period() == 0 {
            return;
        }

        let new_freq = self.next_sweep_frequency();
        if new_freq <= 2047 && self.sweep_shift() != 0 {
            self.frequency = new_freq;
            self.shadow_freq = new_freq;
            self.next_sweep_frequency();
        }
    }

    // a period of 0 is treated as 8
    fn reload_sweep_timer(&self) -> u8 {
        match self.sweep_period() {
            0 => 8,
            period => period,
        }
    }

    // disables the channel when the result leaves the 11-bit range
    fn next_sweep_frequency(&mut self) -> u16 {
        let delta = self.shadow_freq >> self.sweep_shift();
        let new_freq = if self.sweep_negate() {
            self.shadow_freq.wrapping_sub(delta)
        } else {
            self.shadow_freq + delta
        };

        if new_freq > 2047 {
            self.playing = false;
        }
        new_freq
    }
}

struct WaveChannel {
    dac_enabled: bool,
    length: LengthCounter,
    volume_code: u8,
    frequency: u16,

    playing: bool,
    freq_timer: u32,
    position: u8, // 0-31, one nibble of wave RAM each
    wave_ram: [u8; 16],
}

impl WaveChannel {
    fn new() -> Self {
        Self {
            dac_enabled: false,
            length: LengthCounter::new(256),
            volume_code: 0,
            frequency: 0,
            playing: false,
            freq_timer: 0,
            position: 0,
            wave_ram: [0; 16],
        }
    }

    fn read(&self, reg: usize) -> u8 {
        match reg {
            0 => (self.dac_enabled as u8) << 7,
            2 => self.volume_code << 5,
            4 => (self.length.enabled as u8) << 6,
            _ => 0,
        }
    }

    fn write(&mut self, reg: usize, value: u8) {
        match reg {
            0 => self.dac_enabled = is_set(value, 7),
            1 => self.length.load(value),
            2 => self.volume_code = (value >> 5) & 0x03,
            3 => self.frequency = (self.frequency & 0x700) | value as u16,
            4 => {
                self.frequency = (self.frequency & 0xFF) | ((value & 0x07) as u16) << 8;
                self.length.enabled = is_set(value, 6);
                if is_set(value, 7) {
                    self.trigger();
                }
            }
            _ => {}
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 2
    }

    fn trigger(&mut self) {
        self.playing = true;
        self.length.trigger();
        self.freq_timer = self.period();
        self.position = 0;
        self.check_dac();
    }

    fn check_dac(&mut self) {
        if !self.dac_enabled {
            self.playing = false;
        }
    }

    fn tick(&mut self) {
        if !self.playing {
            return;
        }

        if self.freq_timer > 0 {
            self.freq_timer -= 1;
        }
        if self.freq_timer == 0 {
            self.freq_timer = self.period();
            self.position = (self.position + 1) & 31;
        }
    }

    fn output(&self) -> u8 {
        let pair = self.wave_ram[self.position as usize / 2];
        let sample = if self.position % 2 == 0 {
            pair >> 4
        } else {
            pair & 0x0F
        };

        let shift = match self.volume_code {
            0 => 4, // mute
            1 => 0, // 100%
            2 => 1, // 50%
            _ => 2, // 25%
        };
        sample >> shift
    }

    fn clock_length(&mut self) {
        if self.length.clock() {
            self.playing = false;
        }
    }
}

struct NoiseChannel {
    length: LengthCounter,
    envelope: Envelope,
    polynomial: u8, // NR43

    playing: bool,
    freq_timer: u32,
    lfsr: u16, // 15-bit linear feedback shift register
}

impl NoiseChannel {
    fn new() -> Self {
        Self {
            length: LengthCounter::new(64),
            envelope: Envelope::new(),
            polynomial: 0,
            playing: false,
            freq_timer: 0,
            lfsr: 0,
        }
    }

    fn read(&self, reg: usize) -> u8 {
        match reg {
            2 => self.envelope.register,
            3 => self.polynomial,
            4 => (self.length.enabled as u8) << 6,
            _ => 0,
        }
    }

    fn write(&mut self, reg: usize, value: u8) {
        match reg {
            1 => self.length.load(value & 0x3F),
            2 => self.envelope.register = value,
            3 => self.polynomial = value,
            4 => {
                self.length.enabled = is_set(value, 6);
                if is_set(value, 7) {
                    self.trigger();
                }
            }
            _ => {}
        }
    }

    fn period(&self) -> u32 {
        NOISE_DIVISORS[(self.polynomial & 0x07) as usize] << (self.polynomial >> 4)
    }

    fn trigger(&mut self) {
        self.playing = true;
        self.length.trigger();
        self.envelope.trigger();
        self.freq_timer = self.period();
        self.lfsr = 0x7FFF;
        self.check_dac();
    }

    fn check_dac(&mut self) {
        if !self.envelope.dac_enabled() {
            self.playing = false;
        }
    }

    fn tick(&mut self) {
        // shifts 14 and 15 stop the LFSR
        if !self.playing || self.polynomial >> 4 >= NOISE_SHIFT_STOP {
            return;
        }

        if self.freq_timer > 0 {
            self.freq_timer -= 1;
        }
        if self.freq_timer == 0 {
            self.freq_timer = self.period();
            self.shift_lfsr();
        }
    }

    fn shift_lfsr(&mut self) {
        let xor = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr = (self.lfsr >> 1) | (xor << 14);
        // 7-bit mode also feeds bit 6
        if is_set(self.polynomial, 3) {
            self.lfsr = (self.lfsr & !0x40) | (xor << 6);
        }
    }

    fn output(&self) -> u8 {
        if self.lfsr & 1 == 0 {
            self.envelope.volume
        } else {
            0
        }
    }

    fn clock_length(&mut self) {
        if self.length.clock() {
            self.playing = false;
        }
    }

    fn clock_envelope(&mut self) {
        if self.playing {
            self.envelope.clock();
        }
    }
}
