//! WAV container framing for 8-bit mono PCM.

use std::io::Write;

use captcha_common::constants::SAMPLE_RATE;

/// Canonical header length, including the data-length field
pub const HEADER_LEN: usize = 44;

/// Header template. Bytes 4-7 (RIFF size) and 40-43 (data size) are patched.
#[rustfmt::skip]
const HEADER_TEMPLATE: [u8; 40] = [
    b'R', b'I', b'F', b'F',
    0x00, 0x00, 0x00, 0x00,
    b'W', b'A', b'V', b'E',
    b'f', b'm', b't', b' ',
    0x10, 0x00, 0x00, 0x00, // fmt chunk size: 16
    0x01, 0x00, // PCM
    0x01, 0x00, // mono
    0x40, 0x1f, 0x00, 0x00, // sample rate: 8000
    0x40, 0x1f, 0x00, 0x00, // byte rate: 8000
    0x01, 0x00, // block align
    0x08, 0x00, // bits per sample
    b'd', b'a', b't', b'a',
];

const _: () = assert!(SAMPLE_RATE == 8000);

/// Build the 44-byte header for a PCM payload of `data_len` bytes
pub fn wav_header(data_len: usize) -> [u8; HEADER_LEN] {
    let data_len = data_len as u32;
    let mut header = [0u8; HEADER_LEN];
    header[..40].copy_from_slice(&HEADER_TEMPLATE);
    header[4..8].copy_from_slice(&(data_len + 36).to_le_bytes());
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Write header and payload, returning the number of bytes written
pub fn write_wav<W: Write + ?Sized>(w: &mut W, pcm: &[u8]) -> std::io::Result<u64> {
    w.write_all(&wav_header(pcm.len()))?;
    w.write_all(pcm)?;
    Ok((HEADER_LEN + pcm.len()) as u64)
}

/// Locate the PCM payload of a WAV file.
///
/// Chunks are walked from the start, so `LIST` and other extra chunks may sit
/// between `fmt ` and `data`. The format must be PCM, mono, 8 kHz, 8-bit.
pub fn parse_pcm(data: &[u8]) -> std::result::Result<&[u8], String> {
    if data.len() < 12 || &data[..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err("missing RIFF/WAVE header".to_string());
    }

    let mut fmt_ok = false;
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let size = le_u32(&data[pos + 4..pos + 8]) as usize;
        let body_start = pos + 8;
        let body_end = body_start
            .checked_add(size)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| format!("chunk {:?} runs past end of file", id_str(id)))?;
        let body = &data[body_start..body_end];

        match id {
            b"fmt " => {
                check_format(body)?;
                fmt_ok = true;
            }
            b"data" if !fmt_ok => return Err("data chunk before fmt chunk".to_string()),
            b"data" => return Ok(body),
            _ => {}
        }
        // Chunks are padded to even length
        pos = body_end + (size & 1);
    }

    if fmt_ok {
        Err("no data chunk".to_string())
    } else {
        Err("no fmt chunk".to_string())
    }
}

fn check_format(body: &[u8]) -> std::result::Result<(), String> {
    if body.len() < 16 {
        return Err(format!("fmt chunk too short ({} bytes)", body.len()));
    }
    let format = le_u16(&body[0..2]);
    let channels = le_u16(&body[2..4]);
    let rate = le_u32(&body[4..8]) as usize;
    let bits = le_u16(&body[14..16]);
    if format != 1 || channels != 1 || rate != SAMPLE_RATE || bits != 8 {
        return Err(format!(
            "unsupported format: tag {}, {} channels, {} Hz, {} bits (need PCM mono {} Hz 8-bit)",
            format, channels, rate, bits, SAMPLE_RATE
        ));
    }
    Ok(())
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn id_str(id: &[u8]) -> String {
    String::from_utf8_lossy(id).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le32(b: &[u8]) -> u32 {
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    #[test]
    fn test_header_fields() {
        let h = wav_header(1000);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(le32(&h[4..8]), 1036);
        assert_eq!(&h[8..12], b"WAVE");
        assert_eq!(&h[12..16], b"fmt ");
        assert_eq!(le32(&h[16..20]), 16);
        assert_eq!(u16::from_le_bytes([h[20], h[21]]), 1);
        assert_eq!(u16::from_le_bytes([h[22], h[23]]), 1);
        assert_eq!(le32(&h[24..28]), 8000);
        assert_eq!(le32(&h[28..32]), 8000);
        assert_eq!(u16::from_le_bytes([h[32], h[33]]), 1);
        assert_eq!(u16::from_le_bytes([h[34], h[35]]), 8);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(le32(&h[40..44]), 1000);
    }

    #[test]
    fn test_write_wav_sizes() {
        let pcm = vec![128u8; 321];
        let mut out = Vec::new();
        let n = write_wav(&mut out, &pcm).unwrap();
        assert_eq!(n as usize, out.len());
        assert_eq!(out.len(), HEADER_LEN + 321);
        // RIFF size covers everything after the first 8 bytes
        assert_eq!(le32(&out[4..8]) as usize, out.len() - 8);
        assert_eq!(&out[HEADER_LEN..], pcm.as_slice());
    }

    fn wav(pcm: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_wav(&mut out, pcm).unwrap();
        out
    }

    #[test]
    fn test_parse_canonical_file() {
        let pcm: Vec<u8> = (0..=255).collect();
        let file = wav(&pcm);
        assert_eq!(parse_pcm(&file).unwrap(), pcm.as_slice());
        assert_eq!(parse_pcm(&wav(&[])).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_parse_rejects_16_bit() {
        let mut file = wav(&[0, 0, 0, 0]);
        file[32] = 2; // block align
        file[34] = 16; // bits per sample
        let err = parse_pcm(&file).unwrap_err();
        assert!(err.contains("16 bits"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_other_formats() {
        let stereo = {
            let mut f = wav(&[128; 4]);
            f[22] = 2;
            f
        };
        let fast = {
            let mut f = wav(&[128; 4]);
            f[24..28].copy_from_slice(&44_100u32.to_le_bytes());
            f
        };
        let float = {
            let mut f = wav(&[128; 4]);
            f[20] = 3;
            f
        };
        for file in [stereo, fast, float] {
            assert!(parse_pcm(&file).is_err());
        }
    }

    #[test]
    fn test_parse_skips_extra_chunks() {
        let pcm = [1u8, 2, 3, 4, 5];
        let canonical = wav(&pcm);
        let mut file = canonical[..36].to_vec();
        // Odd-sized LIST chunk plus its pad byte
        file.extend_from_slice(b"LIST");
        file.extend_from_slice(&3u32.to_le_bytes());
        file.extend_from_slice(b"abc\0");
        file.extend_from_slice(&canonical[36..]);

        assert_eq!(parse_pcm(&file).unwrap(), &pcm);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let file = wav(&[128; 100]);
        // Declared data length exceeds the file
        assert!(parse_pcm(&file[..HEADER_LEN + 50]).is_err());
        // Header only, no data chunk
        assert!(parse_pcm(&file[..36]).unwrap_err().contains("no data"));
        assert!(parse_pcm(b"RIFF\0\0\0\0AVI ").is_err());
        assert!(parse_pcm(&[]).is_err());

        // data before fmt
        let mut swapped = file[..12].to_vec();
        swapped.extend_from_slice(&file[36..]);
        swapped.extend_from_slice(&file[12..36]);
        assert!(parse_pcm(&swapped).is_err());
    }
}
