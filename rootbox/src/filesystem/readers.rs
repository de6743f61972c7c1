use std::fs::File;
use std::io::{Read, Result, Seek, SeekFrom};
use std::mem::{self, MaybeUninit};
use std::path::PathBuf;
use std::slice;

pub trait ExtraReader {
    /// Reads the content of a file and transmutes it into a structure.
    fn read_struct<T>(&mut self) -> Result<T>;
    /// Reads a path of the given size at a given offset, without moving the
    /// file cursor.
    fn pread_path_at(&mut self, path_size: usize, offset: u64) -> Result<PathBuf>;
}

impl ExtraReader for File {
    fn read_struct<T>(&mut self) -> Result<T> {
        let num_bytes = mem::size_of::<T>();
        unsafe {
            let mut value = MaybeUninit::<T>::uninit();
            let buffer = slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, num_bytes);
            self.read_exact(buffer)?;
            Ok(value.assume_init())
        }
    }

    fn pread_path_at(&mut self, path_size: usize, offset: u64) -> Result<PathBuf> {
        // save the initial position
        let initial_pos = self.seek(SeekFrom::Current(0))?;
        let mut buffer = vec![0; path_size];

        // move the cursor to the offset
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(&mut buffer)?;

        // restore the initial position
        self.seek(SeekFrom::Start(initial_pos))?;

        Ok(PathBuf::from(unsafe {
            String::from_utf8_unchecked(buffer)
        }))
    }
}
