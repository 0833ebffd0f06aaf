//! I/O 抽象层.
//!
//! 为封装器与转封装流程提供统一的读写接口, 支持文件与内存缓冲区两种后端.

use std::io::{self, Read, Seek, Write};
use std::path::Path;

use strand_core::{StrandError, StrandResult};

/// I/O 上下文
///
/// 封装底层 I/O 操作, 读取方向带缓冲, 写入方向直接下发到后端.
pub struct IoContext {
    /// 内部 I/O 实现
    inner: Box<dyn IoBackend>,
    /// 读缓冲区
    buffer: Vec<u8>,
    /// 缓冲区中的有效数据长度
    buf_len: usize,
    /// 缓冲区当前读取位置
    buf_pos: usize,
}

/// I/O 后端 trait
///
/// 实现此 trait 以支持不同的 I/O 目标 (文件、内存等).
pub trait IoBackend: Send {
    /// 读取数据到缓冲区
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 全部写入
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// 定位 (seek)
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64>;
    /// 获取当前位置
    fn position(&mut self) -> io::Result<u64>;
    /// 获取总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
    /// 取出内存后端的数据, 其他后端返回 None
    fn into_data(self: Box<Self>) -> Option<Vec<u8>> {
        None
    }
}

/// 默认缓冲区大小 (32 KB)
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
        }
    }

    /// 创建写入内存的上下文
    pub fn memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// 从内存数据创建 (用于读取)
    pub fn from_data(data: Vec<u8>) -> Self {
        Self::new(Box::new(MemoryBackend::from_data(data)))
    }

    /// 从文件路径打开 (只读)
    pub fn open_read(path: impl AsRef<Path>) -> StrandResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    /// 从文件路径打开 (写入)
    pub fn open_write(path: impl AsRef<Path>) -> StrandResult<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    /// 消耗自身, 取出内存后端的数据
    pub fn into_memory_data(self) -> Option<Vec<u8>> {
        self.inner.into_data()
    }

    // ========================
    // 读取方法
    // ========================

    /// 读取至多 `buf.len()` 字节, 返回 0 表示已到末尾
    pub fn read_some(&mut self, buf: &mut [u8]) -> StrandResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buf_pos == self.buf_len {
            self.buf_pos = 0;
            self.buf_len = self.inner.read(&mut self.buffer)?;
            if self.buf_len == 0 {
                return Ok(0);
            }
        }
        let to_copy = (self.buf_len - self.buf_pos).min(buf.len());
        buf[..to_copy].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + to_copy]);
        self.buf_pos += to_copy;
        Ok(to_copy)
    }

    /// 读取指定字节数
    pub fn read_exact(&mut self, buf: &mut [u8]) -> StrandResult<()> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let read = self.read_some(&mut buf[total_read..])?;
            if read == 0 {
                return Err(StrandError::Eof);
            }
            total_read += read;
        }
        Ok(())
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> StrandResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 读取指定数量的字节
    pub fn read_bytes(&mut self, count: usize) -> StrandResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: u64) -> StrandResult<()> {
        let buffered = (self.buf_len - self.buf_pos) as u64;
        if count <= buffered {
            self.buf_pos += count as usize;
            return Ok(());
        }

        let remaining = count - buffered;
        self.buf_pos = 0;
        self.buf_len = 0;

        if self.inner.is_seekable() {
            self.inner.seek(io::SeekFrom::Current(remaining as i64))?;
        } else {
            let mut left = remaining;
            let mut scratch = [0u8; 4096];
            while left > 0 {
                let to_read = left.min(scratch.len() as u64) as usize;
                let read = self.inner.read(&mut scratch[..to_read])?;
                if read == 0 {
                    return Err(StrandError::Eof);
                }
                left -= read as u64;
            }
        }
        Ok(())
    }

    // ========================
    // 写入方法
    // ========================

    /// 写入全部数据
    pub fn write_all(&mut self, buf: &[u8]) -> StrandResult<()> {
        self.inner.write_all(buf)?;
        Ok(())
    }

    /// 写入 f64 大端
    pub fn write_f64_be(&mut self, v: f64) -> StrandResult<()> {
        self.write_all(&v.to_be_bytes())
    }

    // ========================
    // 定位方法
    // ========================

    /// 定位 (seek)
    ///
    /// 注意: seek 会清空读缓冲区.
    pub fn seek(&mut self, pos: io::SeekFrom) -> StrandResult<u64> {
        self.buf_pos = 0;
        self.buf_len = 0;
        Ok(self.inner.seek(pos)?)
    }

    /// 获取当前位置
    ///
    /// 考虑读缓冲区中尚未消耗的数据量.
    pub fn position(&mut self) -> StrandResult<u64> {
        let raw_pos = self.inner.position()?;
        let buffered = (self.buf_len - self.buf_pos) as u64;
        Ok(raw_pos - buffered)
    }

    /// 是否支持随机访问
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// 获取总大小
    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }
}

/// 文件 I/O 后端
struct FileBackend {
    file: std::fs::File,
    size: Option<u64>,
}

impl FileBackend {
    fn new(file: std::fs::File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        Self { file, size }
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 内存缓冲区 I/O 后端
///
/// 用于测试和内存中处理.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// 数据缓冲区
    data: Vec<u8>,
    /// 当前位置
    pos: usize,
}

impl MemoryBackend {
    /// 从已有数据创建 (用于读取)
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// 创建空缓冲区 (用于写入)
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return Ok(0);
        }
        buf[..to_read].copy_from_slice(&self.data[self.pos..self.pos + to_read]);
        self.pos += to_read;
        Ok(to_read)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.pos >= self.data.len() {
            self.data.resize(self.pos, 0);
            self.data.extend_from_slice(buf);
        } else {
            // 覆盖已有数据
            let overlap = (self.data.len() - self.pos).min(buf.len());
            self.data[self.pos..self.pos + overlap].copy_from_slice(&buf[..overlap]);
            self.data.extend_from_slice(&buf[overlap..]);
        }
        self.pos += buf.len();
        Ok(())
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::End(offset) => self.data.len() as i64 + offset,
            io::SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek 位置不能为负",
            ));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn into_data(self: Box<Self>) -> Option<Vec<u8>> {
        Some(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_write_and_overwrite() {
        let mut io = IoContext::memory();
        io.write_all(&[1, 2, 3, 4]).unwrap();
        io.seek(io::SeekFrom::Start(1)).unwrap();
        io.write_all(&[9, 9]).unwrap();
        assert_eq!(io.position().unwrap(), 3);
        io.seek(io::SeekFrom::End(0)).unwrap();
        io.write_all(&[5]).unwrap();
        assert_eq!(io.into_memory_data().unwrap(), vec![1, 9, 9, 4, 5]);
    }

    #[test]
    fn test_read_some_and_exact() {
        let mut io = IoContext::from_data((0u8..10).collect());
        let mut buf = [0u8; 4];
        assert_eq!(io.read_some(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        assert_eq!(io.position().unwrap(), 4);
        io.skip(2).unwrap();
        assert_eq!(io.read_u8().unwrap(), 6);
        assert_eq!(io.read_bytes(3).unwrap(), vec![7, 8, 9]);
        assert_eq!(io.read_some(&mut buf).unwrap(), 0);
        assert!(matches!(io.read_u8(), Err(StrandError::Eof)));
    }

    #[test]
    fn test_file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let mut io = IoContext::open_write(&path).unwrap();
            io.write_all(b"strand").unwrap();
            io.write_f64_be(1.5).unwrap();
            assert!(io.is_seekable());
        }
        let mut io = IoContext::open_read(&path).unwrap();
        assert_eq!(io.size(), Some(14));
        assert_eq!(io.read_bytes(6).unwrap(), b"strand".to_vec());
        assert_eq!(io.read_bytes(8).unwrap(), 1.5f64.to_be_bytes().to_vec());
        assert!(io.into_memory_data().is_none());
    }
}
