use fitstile_core::codec::{Codec, SampleLayout};
use fitstile_core::format::PLIO_MAX_VALUE;
use fitstile_core::{Algorithm, ByteOrder, CodecError, Result};

/// IRAF pixel-list run-length coder (`PLIO_1`).
///
/// The tile is coded as a line list of 16-bit words: a 7-word header followed
/// by instructions with a 4-bit opcode and 12 bits of data. Uncompressed
/// samples are native-endian 32-bit integers in `0..=2^24 - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlioCodec {
    tilesize: usize,
}

const HEADER_WORDS: usize = 7;
/// Marks the extended header layout in word 3.
const LL_VERSION_MARK: i16 = -100;

// opcodes
const OP_ZN: i32 = 0;
const OP_SH: i32 = 1;
const OP_IH: i32 = 2;
const OP_DH: i32 = 3;
const OP_HN: i32 = 4;
const OP_PN: i32 = 5;
const OP_IS: i32 = 6;
const OP_DS: i32 = 7;

const DATA_MAX: i32 = 4095;

fn word(opcode: i32, data: i32) -> i32 {
    (opcode << 12) | data
}

impl PlioCodec {
    pub fn new(tilesize: usize) -> Self {
        Self { tilesize }
    }
}

/// Encode `pixels` as a line list, header included.
fn encode_line(pixels: &[i32]) -> Vec<i16> {
    let npix = pixels.len();
    let mut ll: Vec<i32> = vec![0, HEADER_WORDS as i32, LL_VERSION_MARK as i32, 0, 0, 0, 0];
    if npix == 0 {
        return ll.into_iter().map(|w| w as i16).collect();
    }

    let mut pv = pixels[0].max(0);
    let mut nv = 0;
    // start of the current high run and of the pending zero run
    let mut x1 = 0usize;
    let mut iz = 0usize;
    let mut hi = 1i32;

    for ip in 0..npix {
        if ip + 1 < npix {
            nv = pixels[ip + 1].max(0);
            if nv == pv {
                continue;
            }
            if pv == 0 {
                pv = nv;
                x1 = ip + 1;
                continue;
            }
        } else if pv == 0 {
            x1 = npix;
        }

        let mut np = (ip + 1 - x1) as i32;
        let mut nz = (x1 - iz) as i32;
        let mut stored = false;

        if pv > 0 {
            let dv = pv - hi;
            if dv != 0 {
                hi = pv;
                if dv.abs() > DATA_MAX {
                    ll.push(word(OP_SH, pv & DATA_MAX));
                    ll.push(pv / 4096);
                } else {
                    ll.push(if dv < 0 {
                        word(OP_DH, -dv)
                    } else {
                        word(OP_IH, dv)
                    });
                    if np == 1 && nz == 0 {
                        // turn the set-high into set-and-store
                        let last = ll.len() - 1;
                        ll[last] |= 1 << 14;
                        stored = true;
                    }
                }
            }
        }

        if !stored && nz > 0 {
            while nz > 0 {
                ll.push(word(OP_ZN, nz.min(DATA_MAX)));
                nz -= DATA_MAX;
            }
            if np == 1 && pv > 0 {
                // a zero run followed by one pixel becomes a single P word,
                // unless the run word is full and the opcode would carry
                let last = ll.len() - 1;
                if ll[last] < DATA_MAX {
                    ll[last] += word(OP_PN, 0) + 1;
                } else {
                    ll.push(word(OP_PN, 1));
                }
                stored = true;
            }
        }

        if !stored {
            while np > 0 {
                ll.push(word(OP_HN, np.min(DATA_MAX)));
                np -= DATA_MAX;
            }
        }

        x1 = ip + 1;
        iz = x1;
        pv = nv;
    }

    let len = ll.len() as i32;
    ll[3] = len % 32768;
    ll[4] = len / 32768;
    ll.into_iter().map(|w| w as i16).collect()
}

/// Decode a line list into `npix` pixels.
fn decode_line(ll: &[i16], npix: usize) -> Result<Vec<i32>> {
    let corrupt = |reason: String| CodecError::decode(Algorithm::Plio1, reason);
    if ll.len() < HEADER_WORDS {
        return Err(corrupt(format!("line list of {} words has no header", ll.len())));
    }
    let (lllen, first) = if ll[2] > 0 {
        (ll[2] as usize, 3usize)
    } else {
        let (low, high, start) = (ll[3], ll[4], ll[1]);
        if low < 0 || high < 0 || start < 0 {
            return Err(corrupt(format!(
                "negative line list length {high}:{low} or start {start}"
            )));
        }
        ((high as usize) << 15 | low as usize, start as usize)
    };
    if lllen > ll.len() || first > lllen {
        return Err(corrupt(format!(
            "line list claims {lllen} words starting at {first}, {} present",
            ll.len()
        )));
    }

    let mut px = vec![0i32; npix];
    let mut op = 0usize;
    let mut x1 = 0usize;
    let mut pv = 1i32;
    let mut ip = first;
    while ip < lllen && x1 < npix {
        let w = ll[ip] as i32;
        let opcode = (w >> 12) & 0xF;
        let data = w & DATA_MAX;
        match opcode {
            OP_ZN | OP_HN | OP_PN => {
                let x2 = x1 + data as usize;
                let end = x2.min(npix);
                if end > x1 {
                    let fill = if opcode == OP_HN { pv } else { 0 };
                    px[op..op + end - x1].fill(fill);
                    op += end - x1;
                    if opcode == OP_PN && end == x2 {
                        px[op - 1] = pv;
                    }
                }
                x1 = x2;
            }
            OP_SH => {
                let high = *ll
                    .get(ip + 1)
                    .filter(|_| ip + 1 < lllen)
                    .ok_or_else(|| corrupt("set-high instruction is missing its second word".into()))?;
                pv = ((high as i32) << 12) + data;
                ip += 1;
            }
            OP_IH => pv = pv.wrapping_add(data),
            OP_DH => pv = pv.wrapping_sub(data),
            OP_IS | OP_DS => {
                pv = if opcode == OP_IS {
                    pv.wrapping_add(data)
                } else {
                    pv.wrapping_sub(data)
                };
                px[op] = pv;
                op += 1;
                x1 += 1;
            }
            _ => {
                return Err(corrupt(format!("unknown opcode {opcode} at word {ip}")));
            }
        }
        ip += 1;
    }
    // anything not covered by the list stays zero
    Ok(px)
}

impl Codec for PlioCodec {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Plio1
    }

    fn sample_layout(&self) -> SampleLayout {
        SampleLayout {
            width: Some(4),
            order: ByteOrder::NATIVE,
        }
    }

    fn encode(&self, samples: &[u8]) -> Result<Vec<u8>> {
        if samples.len() != self.tilesize * 4 {
            return Err(CodecError::encode(
                Algorithm::Plio1,
                format!("{} bytes do not hold {} 32-bit samples", samples.len(), self.tilesize),
            ));
        }
        let mut pixels = Vec::with_capacity(self.tilesize);
        for chunk in samples.chunks_exact(4) {
            let v = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if !(0..=PLIO_MAX_VALUE).contains(&(v as i64)) {
                return Err(CodecError::EncodingRange {
                    value: v as i64,
                    min: 0,
                    max: PLIO_MAX_VALUE,
                });
            }
            pixels.push(v);
        }
        let words = encode_line(&pixels);
        Ok(words.iter().flat_map(|w| w.to_be_bytes()).collect())
    }

    fn decode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        if compressed.len() % 2 != 0 {
            return Err(CodecError::decode(
                Algorithm::Plio1,
                format!("odd stream length {}", compressed.len()),
            ));
        }
        let words: Vec<i16> = compressed
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect();
        let pixels = decode_line(&words, self.tilesize)?;
        Ok(pixels.iter().flat_map(|p| p.to_ne_bytes()).collect())
    }
}
