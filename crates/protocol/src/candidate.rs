//! ICE-Kandidaten-Parser
//!
//! Zerlegt die Wire-Darstellung eines Kandidaten in strukturierte Felder:
//!
//! ```text
//! foundation priority protocol priority2 ip port typ type [raddr <a>] [rport <p>] [tcptype <t>]
//! ```
//!
//! Reine Funktion ohne Seiteneffekte. IP-Adresse und Protokoll werden nicht
//! gegen eine Whitelist geprueft – das ist Aufgabe der Media Engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mindestanzahl Tokens eines gueltigen Kandidaten
pub const MIN_TOKENS: usize = 8;

/// Fehler beim Parsen eines Kandidaten
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateError {
    #[error("Ungueltiger ICE-Kandidat: {tokens} Tokens (mindestens 8 erwartet): {eingabe}")]
    ZuWenigTokens { tokens: usize, eingabe: String },

    #[error("Ungueltiger ICE-Kandidat: Feld '{feld}' ist keine Zahl: {wert}")]
    KeineZahl { feld: &'static str, wert: String },
}

/// Strukturierter ICE-Kandidat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCandidate {
    /// Erstes Token inklusive eines eventuellen `candidate:`-Praefix
    pub foundation: String,
    pub priority: u32,
    pub protocol: String,
    /// Viertes Token, unveraendert uebernommen
    pub priority2: String,
    pub ip: String,
    pub port: u16,
    pub candidate_type: String,
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub tcp_type: Option<String>,
}

impl ParsedCandidate {
    /// Rendert den Kandidaten zurueck in die kanonische Wire-Darstellung
    pub fn to_sdp_string(&self) -> String {
        let mut s = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.priority,
            self.protocol,
            self.priority2,
            self.ip,
            self.port,
            self.candidate_type
        );
        if let Some(addr) = &self.related_address {
            s.push_str(" raddr ");
            s.push_str(addr);
        }
        if let Some(port) = self.related_port {
            s.push_str(&format!(" rport {port}"));
        }
        if let Some(tcp) = &self.tcp_type {
            s.push_str(" tcptype ");
            s.push_str(tcp);
        }
        s
    }
}

/// Parst einen Kandidaten-String
///
/// Fehlschlag bei weniger als 8 Tokens oder wenn `priority`, `port` bzw.
/// der Wert von `rport` keine Ganzzahl ist. Optionale Schluessel-Wert-Paare
/// ab Token 8 duerfen in beliebiger Reihenfolge stehen; unbekannte Schluessel
/// und ein ueberzaehliges letztes Token werden ignoriert.
pub fn parse_candidate(eingabe: &str) -> Result<ParsedCandidate, CandidateError> {
    let teile: Vec<&str> = eingabe.split_whitespace().collect();
    if teile.len() < MIN_TOKENS {
        return Err(CandidateError::ZuWenigTokens {
            tokens: teile.len(),
            eingabe: eingabe.to_string(),
        });
    }

    let priority = zahl::<u32>("priority", teile[1])?;
    let port = zahl::<u16>("port", teile[5])?;

    let mut kandidat = ParsedCandidate {
        foundation: teile[0].to_string(),
        priority,
        protocol: teile[2].to_string(),
        priority2: teile[3].to_string(),
        ip: teile[4].to_string(),
        port,
        // teile[6] ist das Schluesselwort "typ"
        candidate_type: teile[7].to_string(),
        related_address: None,
        related_port: None,
        tcp_type: None,
    };

    for paar in teile[MIN_TOKENS..].chunks_exact(2) {
        match paar[0] {
            "raddr" => kandidat.related_address = Some(paar[1].to_string()),
            "rport" => kandidat.related_port = Some(zahl::<u16>("rport", paar[1])?),
            "tcptype" => kandidat.tcp_type = Some(paar[1].to_string()),
            _ => {}
        }
    }

    Ok(kandidat)
}

fn zahl<T: std::str::FromStr>(feld: &'static str, wert: &str) -> Result<T, CandidateError> {
    wert.parse::<T>().map_err(|_| CandidateError::KeineZahl {
        feld,
        wert: wert.to_string(),
    })
}
